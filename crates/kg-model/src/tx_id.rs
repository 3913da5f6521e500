//! 26-character, lexicographically time-sortable transaction identifiers
//! (ULID-shaped: 48 bits of millisecond timestamp + 80 bits of randomness,
//! Crockford base32 encoded).

use std::fmt;

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const ENCODED_LEN: usize = 26;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TxId([u8; ENCODED_LEN]);

#[derive(Debug, thiserror::Error)]
pub enum TxIdError {
    #[error("tx id must be exactly {ENCODED_LEN} characters, got {0}")]
    WrongLength(usize),
    #[error("tx id contains a character outside the Crockford base32 alphabet: {0:?}")]
    InvalidChar(char),
}

impl TxId {
    /// Construct a TxId from an explicit timestamp (ms since epoch) and
    /// 80 bits of entropy, for deterministic tests.
    pub fn from_parts(timestamp_ms: u64, entropy: u128) -> Self {
        let mut out = [0u8; ENCODED_LEN];
        // 48-bit timestamp -> 10 chars.
        let mut t = timestamp_ms & 0xFFFF_FFFF_FFFF;
        for i in (0..10).rev() {
            out[i] = CROCKFORD[(t & 0x1F) as usize];
            t >>= 5;
        }
        // 80-bit entropy -> 16 chars.
        let mut e = entropy;
        for i in (10..26).rev() {
            out[i] = CROCKFORD[(e & 0x1F) as usize];
            e >>= 5;
        }
        TxId(out)
    }

    pub fn timestamp_ms(&self) -> u64 {
        let mut t: u64 = 0;
        for &c in &self.0[0..10] {
            t = (t << 5) | crockford_value(c) as u64;
        }
        t
    }

    pub fn as_str(&self) -> &str {
        // Safe: the alphabet is ASCII.
        std::str::from_utf8(&self.0).expect("crockford alphabet is ASCII")
    }
}

fn crockford_value(c: u8) -> u8 {
    CROCKFORD.iter().position(|&x| x == c).unwrap_or(0) as u8
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for TxId {
    type Error = TxIdError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl TryFrom<&str> for TxId {
    type Error = TxIdError;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.len() != ENCODED_LEN {
            return Err(TxIdError::WrongLength(value.len()));
        }
        let mut out = [0u8; ENCODED_LEN];
        for (i, c) in value.chars().enumerate() {
            let upper = c.to_ascii_uppercase();
            if !CROCKFORD.contains(&(upper as u8)) {
                return Err(TxIdError::InvalidChar(c));
            }
            out[i] = upper as u8;
        }
        Ok(TxId(out))
    }
}

impl From<TxId> for String {
    fn from(id: TxId) -> Self {
        id.as_str().to_string()
    }
}
