use serde::{Deserialize, Serialize};

use crate::EntityId;

/// A geographic coordinate, WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// The tagged union over object values a triple may point at.
///
/// Every branch here is enumerated in the binary encoding (§4.2); an
/// unrecognized tag byte on decode must be refused, never silently
/// coerced (§9 "dynamic object types").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum TypedObject {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Ref(EntityId),
    RefArray(Vec<EntityId>),
    Timestamp(u64),
    Date(String),
    Json(serde_json::Value),
    GeoPoint(GeoPoint),
    Url(String),
}

/// Tag bytes for the binary encoding. Stable: part of the GraphCol
/// external contract (§4.2).
pub mod tag {
    pub const NULL: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT64: u8 = 2;
    pub const FLOAT64: u8 = 3;
    pub const STRING: u8 = 4;
    pub const REF: u8 = 5;
    pub const REF_ARRAY: u8 = 6;
    pub const TIMESTAMP: u8 = 7;
    pub const DATE: u8 = 8;
    pub const JSON: u8 = 9;
    pub const GEO_POINT: u8 = 10;
    pub const URL: u8 = 11;
}

impl TypedObject {
    pub fn tag(&self) -> u8 {
        match self {
            TypedObject::Null => tag::NULL,
            TypedObject::Bool(_) => tag::BOOL,
            TypedObject::Int64(_) => tag::INT64,
            TypedObject::Float64(_) => tag::FLOAT64,
            TypedObject::String(_) => tag::STRING,
            TypedObject::Ref(_) => tag::REF,
            TypedObject::RefArray(_) => tag::REF_ARRAY,
            TypedObject::Timestamp(_) => tag::TIMESTAMP,
            TypedObject::Date(_) => tag::DATE,
            TypedObject::Json(_) => tag::JSON,
            TypedObject::GeoPoint(_) => tag::GEO_POINT,
            TypedObject::Url(_) => tag::URL,
        }
    }

    /// True for object types that point at another entity (used to
    /// partition triples into `properties` vs. `edges` on materialization,
    /// §4.9.5).
    pub fn is_reference(&self) -> bool {
        matches!(self, TypedObject::Ref(_) | TypedObject::RefArray(_))
    }

    /// Semantic value hash for the POS index (§4.11): strings use a
    /// first-100-chars-plus-tail scheme, numerics are stringified, geo
    /// is formatted at 6 decimal places.
    pub fn pos_value_hash(&self) -> String {
        match self {
            TypedObject::Null => "null".to_string(),
            TypedObject::Bool(b) => b.to_string(),
            TypedObject::Int64(i) => i.to_string(),
            TypedObject::Float64(f) => f.to_string(),
            TypedObject::String(s) => string_value_hash(s),
            TypedObject::Ref(id) => id.as_str().to_string(),
            TypedObject::RefArray(ids) => ids.iter().map(|i| i.as_str()).collect::<Vec<_>>().join(","),
            TypedObject::Timestamp(t) => t.to_string(),
            TypedObject::Date(d) => d.clone(),
            TypedObject::Json(v) => string_value_hash(&v.to_string()),
            TypedObject::GeoPoint(g) => format!("{:.6},{:.6}", g.lat, g.lng),
            TypedObject::Url(u) => string_value_hash(u),
        }
    }
}

fn string_value_hash(s: &str) -> String {
    const PREFIX_CHARS: usize = 100;
    let prefix: String = s.chars().take(PREFIX_CHARS).collect();
    if s.chars().count() <= PREFIX_CHARS {
        return prefix;
    }
    let tail_hash = fnv1a(s.as_bytes());
    format!("{prefix}#{tail_hash:016x}")
}

/// FNV-1a, used only to fingerprint the un-prefixed tail of long strings
/// for the POS value hash; not a cryptographic hash.
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_hash_to_themselves() {
        assert_eq!(TypedObject::String("hello".into()).pos_value_hash(), "hello");
    }

    #[test]
    fn long_strings_hash_with_tail_fingerprint() {
        let long = "x".repeat(150);
        let hash = TypedObject::String(long.clone()).pos_value_hash();
        assert!(hash.starts_with(&"x".repeat(100)));
        assert!(hash.contains('#'));
        // Identical long strings hash identically (idempotent re-indexing).
        assert_eq!(hash, TypedObject::String(long).pos_value_hash());
    }

    #[test]
    fn references_are_flagged() {
        let e: EntityId = "https://example.com/e/1".parse().unwrap();
        assert!(TypedObject::Ref(e.clone()).is_reference());
        assert!(TypedObject::RefArray(vec![e]).is_reference());
        assert!(!TypedObject::String("x".into()).is_reference());
    }
}
