//! POS index (§4.11): `(predicate, valueHash) → [subject]`, supporting
//! equality, range scans over ordered scalar types, and predicate-only
//! listing.

use std::sync::Mutex;

use kg_model::{EntityId, Triple, TypedObject};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

pub struct PosIndex {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosRow {
    pub predicate: String,
    pub value_hash: String,
    pub subject: String,
    pub numeric_value: Option<f64>,
}

fn numeric_value(object: &TypedObject) -> Option<f64> {
    match object {
        TypedObject::Int64(i) => Some(*i as f64),
        TypedObject::Float64(f) => Some(*f),
        TypedObject::Timestamp(t) => Some(*t as f64),
        _ => None,
    }
}

impl PosIndex {
    pub fn open(conn: Connection) -> Result<Self, IndexError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS pos (
                predicate TEXT NOT NULL,
                value_hash TEXT NOT NULL,
                subject TEXT NOT NULL,
                numeric_value REAL,
                PRIMARY KEY (predicate, value_hash, subject)
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_pos_predicate ON pos(predicate)", [])?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_pos_numeric ON pos(predicate, numeric_value)", [])?;
        Ok(PosIndex { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::open(Connection::open_in_memory()?)
    }

    /// Non-reference triples only; idempotent re-indexing via the
    /// composite primary key.
    pub fn index_triple(&self, triple: &Triple) -> Result<(), IndexError> {
        if triple.object.is_reference() {
            return Ok(());
        }
        let value_hash = triple.object.pos_value_hash();
        let numeric = numeric_value(&triple.object);
        self.conn.lock().unwrap().execute(
            "INSERT OR IGNORE INTO pos (predicate, value_hash, subject, numeric_value) VALUES (?1, ?2, ?3, ?4)",
            params![triple.predicate.as_str(), value_hash, triple.subject.as_str(), numeric],
        )?;
        Ok(())
    }

    pub fn unindex_triple(&self, triple: &Triple) -> Result<(), IndexError> {
        let value_hash = triple.object.pos_value_hash();
        self.conn.lock().unwrap().execute(
            "DELETE FROM pos WHERE predicate = ?1 AND value_hash = ?2 AND subject = ?3",
            params![triple.predicate.as_str(), value_hash, triple.subject.as_str()],
        )?;
        Ok(())
    }

    pub fn get_by_value(&self, predicate: &str, value_hash: &str) -> Result<Vec<EntityId>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT subject FROM pos WHERE predicate = ?1 AND value_hash = ?2")?;
        let rows = stmt.query_map(params![predicate, value_hash], |row| row.get::<_, String>(0))?;
        collect_entity_ids(rows)
    }

    /// Inclusive range over the numeric column; only meaningful for
    /// Int64/Float64/Timestamp objects (others have `numeric_value = NULL`
    /// and are excluded).
    pub fn get_by_range(&self, predicate: &str, min: f64, max: f64) -> Result<Vec<EntityId>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT subject FROM pos WHERE predicate = ?1 AND numeric_value BETWEEN ?2 AND ?3 ORDER BY numeric_value",
        )?;
        let rows = stmt.query_map(params![predicate, min, max], |row| row.get::<_, String>(0))?;
        collect_entity_ids(rows)
    }

    pub fn get_by_predicate(&self, predicate: &str) -> Result<Vec<EntityId>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT DISTINCT subject FROM pos WHERE predicate = ?1")?;
        let rows = stmt.query_map(params![predicate], |row| row.get::<_, String>(0))?;
        collect_entity_ids(rows)
    }

    pub fn row_count(&self) -> Result<u64, IndexError> {
        let count: i64 = self.conn.lock().unwrap().query_row("SELECT COUNT(*) FROM pos", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn export_rows(&self) -> Result<Vec<PosRow>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT predicate, value_hash, subject, numeric_value FROM pos")?;
        let rows = stmt.query_map([], |row| {
            Ok(PosRow {
                predicate: row.get(0)?,
                value_hash: row.get(1)?,
                subject: row.get(2)?,
                numeric_value: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn import_rows(&self, rows: &[PosRow]) -> Result<(), IndexError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for row in rows {
            tx.execute(
                "INSERT OR IGNORE INTO pos (predicate, value_hash, subject, numeric_value) VALUES (?1, ?2, ?3, ?4)",
                params![row.predicate, row.value_hash, row.subject, row.numeric_value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn collect_entity_ids(
    rows: impl Iterator<Item = Result<String, rusqlite::Error>>,
) -> Result<Vec<EntityId>, IndexError> {
    let mut out = Vec::new();
    for row in rows {
        let subject = row?;
        out.push(EntityId::from_raw(subject));
    }
    Ok(out)
}
