//! Full-text index (§4.11): a tokenized inverted index over string
//! properties, scored with BM25.
//!
//! Tokenization is a small unicode-aware word splitter: lower-case,
//! split on Unicode word boundaries, drop anything that isn't
//! alphanumeric, and drop a short English stop list.

use std::collections::HashMap;
use std::sync::Mutex;

use kg_model::EntityId;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::error::IndexError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsDocRow {
    pub entity_id: String,
    pub length: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtsPostingRow {
    pub term: String,
    pub entity_id: String,
    pub term_freq: i64,
}

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "were", "will", "with",
];

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(|w| w.to_lowercase())
        .filter(|w| !w.is_empty() && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

pub struct FtsIndex {
    conn: Mutex<Connection>,
}

impl FtsIndex {
    pub fn open(conn: Connection) -> Result<Self, IndexError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS fts_docs (
                entity_id TEXT PRIMARY KEY,
                length INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS fts_postings (
                term TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                term_freq INTEGER NOT NULL,
                PRIMARY KEY (term, entity_id)
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_fts_term ON fts_postings(term)", [])?;
        Ok(FtsIndex { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::open(Connection::open_in_memory()?)
    }

    /// Indexes `text` for `entity_id`, replacing any document already
    /// indexed under that id.
    pub fn index_document(&self, entity_id: &EntityId, text: &str) -> Result<(), IndexError> {
        self.unindex_document(entity_id)?;
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(());
        }
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for t in &tokens {
            *counts.entry(t.as_str()).or_insert(0) += 1;
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO fts_docs (entity_id, length) VALUES (?1, ?2)",
            params![entity_id.as_str(), tokens.len() as i64],
        )?;
        for (term, freq) in &counts {
            tx.execute(
                "INSERT INTO fts_postings (term, entity_id, term_freq) VALUES (?1, ?2, ?3)",
                params![term, entity_id.as_str(), *freq as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn unindex_document(&self, entity_id: &EntityId) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM fts_docs WHERE entity_id = ?1", params![entity_id.as_str()])?;
        conn.execute("DELETE FROM fts_postings WHERE entity_id = ?1", params![entity_id.as_str()])?;
        Ok(())
    }

    fn doc_count_and_avg_len(&self, conn: &Connection) -> Result<(f64, f64), IndexError> {
        let (count, total): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(length), 0) FROM fts_docs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if count == 0 {
            return Ok((0.0, 0.0));
        }
        Ok((count as f64, total as f64 / count as f64))
    }

    /// BM25-scored search over `query`, highest score first, truncated to
    /// `limit`.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<(EntityId, f64)>, IndexError> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().unwrap();
        let (doc_count, avg_len) = self.doc_count_and_avg_len(&conn)?;
        if doc_count == 0.0 {
            return Ok(Vec::new());
        }
        let mut scores: HashMap<String, f64> = HashMap::new();
        for term in &terms {
            let mut stmt = conn.prepare(
                "SELECT p.entity_id, p.term_freq, d.length FROM fts_postings p
                 JOIN fts_docs d ON d.entity_id = p.entity_id
                 WHERE p.term = ?1",
            )?;
            let rows = stmt.query_map(params![term], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })?;
            let postings: Vec<(String, i64, i64)> = rows.collect::<Result<_, _>>()?;
            let doc_freq = postings.len() as f64;
            if doc_freq == 0.0 {
                continue;
            }
            let idf = ((doc_count - doc_freq + 0.5) / (doc_freq + 0.5) + 1.0).ln();
            for (entity_id, term_freq, doc_len) in postings {
                let tf = term_freq as f64;
                let norm = 1.0 - BM25_B + BM25_B * (doc_len as f64 / avg_len);
                let score = idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * norm);
                *scores.entry(entity_id).or_insert(0.0) += score;
            }
        }
        let mut ranked: Vec<(EntityId, f64)> =
            scores.into_iter().map(|(id, score)| (EntityId::from_raw(id), score)).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(limit);
        Ok(ranked)
    }

    pub fn doc_count(&self) -> Result<u64, IndexError> {
        let count: i64 = self.conn.lock().unwrap().query_row("SELECT COUNT(*) FROM fts_docs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn export_rows(&self) -> Result<(Vec<FtsDocRow>, Vec<FtsPostingRow>), IndexError> {
        let conn = self.conn.lock().unwrap();
        let mut doc_stmt = conn.prepare("SELECT entity_id, length FROM fts_docs")?;
        let docs = doc_stmt
            .query_map([], |row| Ok(FtsDocRow { entity_id: row.get(0)?, length: row.get(1)? }))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut posting_stmt = conn.prepare("SELECT term, entity_id, term_freq FROM fts_postings")?;
        let postings = posting_stmt
            .query_map([], |row| {
                Ok(FtsPostingRow { term: row.get(0)?, entity_id: row.get(1)?, term_freq: row.get(2)? })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((docs, postings))
    }

    pub fn import_rows(&self, docs: &[FtsDocRow], postings: &[FtsPostingRow]) -> Result<(), IndexError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for doc in docs {
            tx.execute(
                "INSERT OR IGNORE INTO fts_docs (entity_id, length) VALUES (?1, ?2)",
                params![doc.entity_id, doc.length],
            )?;
        }
        for posting in postings {
            tx.execute(
                "INSERT OR IGNORE INTO fts_postings (term, entity_id, term_freq) VALUES (?1, ?2, ?3)",
                params![posting.term, posting.entity_id, posting.term_freq],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
