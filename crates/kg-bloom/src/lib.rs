//! Classic Bloom filter over UTF-8 byte sequences (§4.1, C1).
//!
//! Parameters `(m, k)` are derived from `(capacity, target_fpr)` using the
//! standard formulas. Membership uses enhanced double hashing from two
//! independent 64-bit hashes, so only two underlying hash computations are
//! needed regardless of `k`. No removal is supported; `might_contain`
//! guarantees no false negatives.

use std::f64::consts::LN_2;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum BloomError {
    #[error("unsupported bloom filter version: {0}")]
    UnsupportedVersion(u32),
    #[error("corrupt bloom filter serialization: {0}")]
    CorruptFormat(String),
}

const CURRENT_VERSION: u32 = 1;

/// On-the-wire representation: base64 of the raw bit array plus scalar
/// metadata (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedBloom {
    pub filter: String, // base64
    pub k: u32,
    pub m: u64,
    pub version: u32,
    pub meta: BloomMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomMeta {
    pub capacity: u64,
    pub target_fpr: f64,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>, // bit-packed, 64 bits per word
    m: u64,         // number of bits
    k: u32,         // number of hash functions
    capacity: u64,
    target_fpr: f64,
    count: u64,
}

impl BloomFilter {
    /// Size a new filter for `capacity` items at `target_fpr` false-positive
    /// rate, using the standard `m = -n*ln(p)/ln(2)^2`, `k = (m/n)*ln(2)`.
    pub fn new(capacity: u64, target_fpr: f64) -> Self {
        let capacity = capacity.max(1);
        let target_fpr = target_fpr.clamp(1e-9, 0.5);
        let m = (-(capacity as f64) * target_fpr.ln() / (LN_2 * LN_2)).ceil() as u64;
        let m = m.max(64);
        let k = ((m as f64 / capacity as f64) * LN_2).round().max(1.0) as u32;
        let words = (m as usize + 63) / 64;
        BloomFilter {
            bits: vec![0u64; words],
            m,
            k,
            capacity,
            target_fpr,
            count: 0,
        }
    }

    pub fn m(&self) -> u64 {
        self.m
    }

    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    fn bit_positions(&self, key: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let h1 = fnv1a(key, 0xcbf29ce484222325);
        let h2 = fnv1a(key, 0x9e3779b97f4a7c15).max(1); // never 0, or double hashing degenerates to h1 alone
        let m = self.m;
        (0..self.k as u64).map(move |i| {
            let combined = h1
                .wrapping_add(i.wrapping_mul(h2))
                .wrapping_add(i.wrapping_mul(i));
            combined % m
        })
    }

    pub fn add(&mut self, key: impl AsRef<[u8]>) {
        for pos in self.bit_positions(key.as_ref()).collect::<Vec<_>>() {
            let word = (pos / 64) as usize;
            let bit = pos % 64;
            self.bits[word] |= 1 << bit;
        }
        self.count += 1;
    }

    /// No false negatives: if a key was ever `add`-ed, this always returns
    /// true. False positives are possible and bounded by the configured
    /// target rate for `count <= capacity`.
    pub fn might_contain(&self, key: impl AsRef<[u8]>) -> bool {
        self.bit_positions(key.as_ref()).all(|pos| {
            let word = (pos / 64) as usize;
            let bit = pos % 64;
            (self.bits[word] >> bit) & 1 == 1
        })
    }

    /// Estimated current false-positive rate given bits set so far, via
    /// `(1 - e^(-kn/m))^k`.
    pub fn estimated_fpr(&self) -> f64 {
        let exponent = -(self.k as f64) * (self.count as f64) / (self.m as f64);
        (1.0 - exponent.exp()).powi(self.k as i32)
    }

    pub fn serialize(&self) -> SerializedBloom {
        let mut bytes = Vec::with_capacity(self.bits.len() * 8);
        for w in &self.bits {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        SerializedBloom {
            filter: BASE64.encode(&bytes),
            k: self.k,
            m: self.m,
            version: CURRENT_VERSION,
            meta: BloomMeta {
                capacity: self.capacity,
                target_fpr: self.target_fpr,
                count: self.count,
            },
        }
    }

    pub fn deserialize(s: &SerializedBloom) -> Result<Self, BloomError> {
        if s.version != CURRENT_VERSION {
            return Err(BloomError::UnsupportedVersion(s.version));
        }
        let bytes = BASE64
            .decode(&s.filter)
            .map_err(|e| BloomError::CorruptFormat(e.to_string()))?;
        let expected_words = (s.m as usize + 63) / 64;
        if bytes.len() != expected_words * 8 {
            return Err(BloomError::CorruptFormat(format!(
                "expected {} bytes for m={}, got {}",
                expected_words * 8,
                s.m,
                bytes.len()
            )));
        }
        let bits = bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        Ok(BloomFilter {
            bits,
            m: s.m,
            k: s.k,
            capacity: s.meta.capacity,
            target_fpr: s.meta.target_fpr,
            count: s.meta.count,
        })
    }
}

/// Two independent-enough 64-bit hashes are derived from one FNV-1a pass
/// seeded differently, per §4.1 "two independent 64-bit hashes combined".
fn fnv1a(bytes: &[u8], offset_basis: u64) -> u64 {
    const PRIME: u64 = 0x100000001b3;
    let mut hash = offset_basis;
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
    fn no_false_negatives() {
        let mut f = BloomFilter::new(1000, 0.01);
        let keys: Vec<String> = (0..1000).map(|i| format!("key-{i}")).collect();
        for k in &keys {
            f.add(k);
        }
        for k in &keys {
            assert!(f.might_contain(k), "false negative for {k}");
        }
    }

    #[test]
    fn false_positive_rate_within_2x_of_target_at_capacity() {
        let target = 0.01;
        let capacity = 2000u64;
        let mut f = BloomFilter::new(capacity, target);
        for i in 0..capacity {
            f.add(format!("present-{i}"));
        }
        let mut false_positives = 0u64;
        let trials = 20_000u64;
        for i in 0..trials {
            if f.might_contain(format!("absent-{i}")) {
                false_positives += 1;
            }
        }
        let observed = false_positives as f64 / trials as f64;
        assert!(
            observed <= target * 2.0,
            "observed fpr {observed} exceeds 2x target {target}"
        );
    }

    #[test]
    fn serialize_round_trips() {
        let mut f = BloomFilter::new(100, 0.05);
        f.add("a");
        f.add("b");
        let s = f.serialize();
        let restored = BloomFilter::deserialize(&s).unwrap();
        assert!(restored.might_contain("a"));
        assert!(restored.might_contain("b"));
        assert_eq!(restored.count(), 2);
        assert_eq!(restored.m(), f.m());
        assert_eq!(restored.k(), f.k());
    }

    #[test]
    fn deserialize_rejects_unsupported_version() {
        let mut s = BloomFilter::new(10, 0.1).serialize();
        s.version = 99;
        assert!(matches!(BloomFilter::deserialize(&s), Err(BloomError::UnsupportedVersion(99))));
    }

    #[test]
    fn deserialize_rejects_corrupt_payload() {
        let mut s = BloomFilter::new(10, 0.1).serialize();
        s.filter = "not-valid-base64!!".to_string();
        assert!(matches!(BloomFilter::deserialize(&s), Err(BloomError::CorruptFormat(_))));
    }

    proptest::proptest! {
        #[test]
        fn added_keys_are_always_found(keys in proptest::collection::vec("[a-z0-9]{1,20}", 0..200)) {
            let mut f = BloomFilter::new(keys.len().max(1) as u64, 0.01);
            for k in &keys {
                f.add(k);
            }
            for k in &keys {
                proptest::prop_assert!(f.might_contain(k));
            }
        }
    }
}
