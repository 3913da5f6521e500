//! OSP index (§4.11): `objectRef → [(predicate, subject)]`, the reverse of
//! a REF/REF_ARRAY edge, answering "who points at this entity".

use std::sync::Mutex;

use kg_model::{EntityId, Triple, TypedObject};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

pub struct OspIndex {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OspRow {
    pub object_ref: String,
    pub predicate: String,
    pub subject: String,
}

impl OspIndex {
    pub fn open(conn: Connection) -> Result<Self, IndexError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS osp (
                object_ref TEXT NOT NULL,
                predicate TEXT NOT NULL,
                subject TEXT NOT NULL,
                PRIMARY KEY (object_ref, predicate, subject)
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_osp_object ON osp(object_ref)", [])?;
        Ok(OspIndex { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::open(Connection::open_in_memory()?)
    }

    /// Reference triples only; a `RefArray` is indexed once per target, so
    /// each target independently answers "who points at me".
    pub fn index_triple(&self, triple: &Triple) -> Result<(), IndexError> {
        let targets: Vec<&EntityId> = match &triple.object {
            TypedObject::Ref(id) => vec![id],
            TypedObject::RefArray(ids) => ids.iter().collect(),
            _ => return Ok(()),
        };
        let conn = self.conn.lock().unwrap();
        for target in targets {
            conn.execute(
                "INSERT OR IGNORE INTO osp (object_ref, predicate, subject) VALUES (?1, ?2, ?3)",
                params![target.as_str(), triple.predicate.as_str(), triple.subject.as_str()],
            )?;
        }
        Ok(())
    }

    pub fn unindex_triple(&self, triple: &Triple) -> Result<(), IndexError> {
        let targets: Vec<&EntityId> = match &triple.object {
            TypedObject::Ref(id) => vec![id],
            TypedObject::RefArray(ids) => ids.iter().collect(),
            _ => return Ok(()),
        };
        let conn = self.conn.lock().unwrap();
        for target in targets {
            conn.execute(
                "DELETE FROM osp WHERE object_ref = ?1 AND predicate = ?2 AND subject = ?3",
                params![target.as_str(), triple.predicate.as_str(), triple.subject.as_str()],
            )?;
        }
        Ok(())
    }

    pub fn get_references_to(&self, object_ref: &str) -> Result<Vec<(EntityId, String)>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT subject, predicate FROM osp WHERE object_ref = ?1")?;
        let rows = stmt.query_map(params![object_ref], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (subject, predicate) = row?;
            out.push((EntityId::from_raw(subject), predicate));
        }
        Ok(out)
    }

    pub fn get_references_to_via(&self, object_ref: &str, predicate: &str) -> Result<Vec<EntityId>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT subject FROM osp WHERE object_ref = ?1 AND predicate = ?2")?;
        let rows = stmt.query_map(params![object_ref, predicate], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(EntityId::from_raw(row?));
        }
        Ok(out)
    }

    pub fn row_count(&self) -> Result<u64, IndexError> {
        let count: i64 = self.conn.lock().unwrap().query_row("SELECT COUNT(*) FROM osp", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn export_rows(&self) -> Result<Vec<OspRow>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT object_ref, predicate, subject FROM osp")?;
        let rows = stmt.query_map([], |row| {
            Ok(OspRow { object_ref: row.get(0)?, predicate: row.get(1)?, subject: row.get(2)? })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn import_rows(&self, rows: &[OspRow]) -> Result<(), IndexError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for row in rows {
            tx.execute(
                "INSERT OR IGNORE INTO osp (object_ref, predicate, subject) VALUES (?1, ?2, ?3)",
                params![row.object_ref, row.predicate, row.subject],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_model::TxId;

    fn ref_triple(subject: &str, predicate: &str, targets: Vec<&str>) -> Triple {
        let object = if targets.len() == 1 {
            TypedObject::Ref(targets[0].parse().unwrap())
        } else {
            TypedObject::RefArray(targets.iter().map(|t| t.parse().unwrap()).collect())
        };
        Triple { subject: subject.parse().unwrap(), predicate: predicate.parse().unwrap(), object, timestamp: 1, tx_id: TxId::from_parts(1, 0) }
    }

    #[test]
    fn single_ref_is_reverse_indexed() {
        let idx = OspIndex::open_in_memory().unwrap();
        idx.index_triple(&ref_triple("s1", "directedBy", vec!["d1"])).unwrap();
        let refs = idx.get_references_to("d1").unwrap();
        assert_eq!(refs, vec![(EntityId::from_raw("s1"), "directedBy".to_string())]);
    }

    #[test]
    fn ref_array_indexes_each_target_independently() {
        let idx = OspIndex::open_in_memory().unwrap();
        idx.index_triple(&ref_triple("movie1", "actors", vec!["a1", "a2"])).unwrap();
        assert_eq!(idx.get_references_to_via("a1", "actors").unwrap(), vec![EntityId::from_raw("movie1")]);
        assert_eq!(idx.get_references_to_via("a2", "actors").unwrap(), vec![EntityId::from_raw("movie1")]);
    }

    #[test]
    fn unindex_removes_all_targets_of_a_ref_array() {
        let idx = OspIndex::open_in_memory().unwrap();
        let t = ref_triple("movie1", "actors", vec!["a1", "a2"]);
        idx.index_triple(&t).unwrap();
        idx.unindex_triple(&t).unwrap();
        assert!(idx.get_references_to("a1").unwrap().is_empty());
        assert!(idx.get_references_to("a2").unwrap().is_empty());
    }

    #[test]
    fn scalar_triples_are_skipped() {
        let idx = OspIndex::open_in_memory().unwrap();
        let t = Triple { subject: "s1".parse().unwrap(), predicate: "name".parse().unwrap(), object: TypedObject::String("Alice".into()), timestamp: 1, tx_id: TxId::from_parts(1, 0) };
        idx.index_triple(&t).unwrap();
        assert!(idx.get_references_to("s1").unwrap().is_empty());
    }
}
