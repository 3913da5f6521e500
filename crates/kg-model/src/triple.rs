use serde::{Deserialize, Serialize};

use crate::{EntityId, Predicate, TxId, TypedObject};

/// The atomic unit of the graph: a versioned statement about an entity.
///
/// Invariant (§3): for a given `(subject, predicate)` pair, the triple with
/// the greatest `timestamp` is the current value. Older versions may persist
/// in older chunks but are shadowed on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub subject: EntityId,
    pub predicate: Predicate,
    pub object: TypedObject,
    pub timestamp: u64,
    pub tx_id: TxId,
}

impl Triple {
    /// Sort key used when grouping a chunk's triples by subject and, within
    /// a subject, ordering by `(predicate, timestamp desc)` so the current
    /// value sorts first (§4.2 encoding contract).
    pub fn encode_sort_key(&self) -> (&str, &str, std::cmp::Reverse<u64>) {
        (
            self.subject.as_str(),
            self.predicate.as_str(),
            std::cmp::Reverse(self.timestamp),
        )
    }
}

/// Merge a set of triples down to the current value per `(subject,
/// predicate)`, per the §3 shadowing invariant. Ties (equal timestamps) are
/// broken by preferring the triple later in iteration order, so callers can
/// feed "newer source first" sequences (e.g. buffer before chunks) and rely
/// on the first-seen value winning ties just as §4.10 `query` specifies.
pub fn merge_current<'a>(triples: impl IntoIterator<Item = &'a Triple>) -> Vec<Triple> {
    use std::collections::HashMap;
    let mut winners: HashMap<(&str, &str), &Triple> = HashMap::new();
    for t in triples {
        let key = (t.subject.as_str(), t.predicate.as_str());
        match winners.get(&key) {
            Some(existing) if existing.timestamp > t.timestamp => {}
            _ => {
                winners.insert(key, t);
            }
        }
    }
    let mut out: Vec<Triple> = winners.into_values().cloned().collect();
    out.sort_by(|a, b| a.encode_sort_key().cmp(&b.encode_sort_key()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(subject: &str, predicate: &str, ts: u64) -> Triple {
        Triple {
            subject: subject.parse().unwrap(),
            predicate: predicate.parse().unwrap(),
            object: TypedObject::Int64(ts as i64),
            timestamp: ts,
            tx_id: TxId::from_parts(ts, 0),
        }
    }

    #[test]
    fn merge_current_keeps_max_timestamp_per_subject_predicate() {
        let a = triple("s1", "p1", 10);
        let b = triple("s1", "p1", 20);
        let c = triple("s1", "p2", 5);
        let merged = merge_current([&a, &b, &c]);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|t| t.timestamp == 20 && t.predicate.as_str() == "p1"));
        assert!(merged.iter().any(|t| t.timestamp == 5 && t.predicate.as_str() == "p2"));
    }

    #[test]
    fn merge_current_breaks_exact_ties_toward_later_iteration_order() {
        let a = triple("s1", "p1", 10);
        let mut b = triple("s1", "p1", 10);
        b.object = TypedObject::String("winner".into());
        let merged = merge_current([&a, &b]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].object, TypedObject::String("winner".into()));
    }
}
