//! First-seen-order string dictionaries (§4.2): subject/ref entity ids,
//! predicates, and string literals are each assigned a small integer code
//! the first time they're encountered.

use std::collections::HashMap;

use crate::varint::{read_uvarint, write_uvarint};

#[derive(Debug, Default)]
pub struct DictBuilder {
    codes: HashMap<String, u32>,
    values: Vec<String>,
}

impl DictBuilder {
    pub fn intern(&mut self, value: &str) -> u32 {
        if let Some(&code) = self.codes.get(value) {
            return code;
        }
        let code = self.values.len() as u32;
        self.values.push(value.to_string());
        self.codes.insert(value.to_string(), code);
        code
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        write_uvarint(out, self.values.len() as u64);
        for v in &self.values {
            let bytes = v.as_bytes();
            write_uvarint(out, bytes.len() as u64);
            out.extend_from_slice(bytes);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    values: Vec<String>,
}

impl Dictionary {
    pub fn decode(buf: &[u8], pos: &mut usize) -> Option<Self> {
        let count = read_uvarint(buf, pos)?;
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = read_uvarint(buf, pos)? as usize;
            let end = pos.checked_add(len)?;
            let bytes = buf.get(*pos..end)?;
            let s = std::str::from_utf8(bytes).ok()?.to_string();
            values.push(s);
            *pos = end;
        }
        Some(Dictionary { values })
    }

    pub fn get(&self, code: u32) -> Option<&str> {
        self.values.get(code as usize).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_codes_in_first_seen_order() {
        let mut b = DictBuilder::default();
        assert_eq!(b.intern("b"), 0);
        assert_eq!(b.intern("a"), 1);
        assert_eq!(b.intern("b"), 0); // repeat reuses the code
        assert_eq!(b.values.len(), 2);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let mut b = DictBuilder::default();
        b.intern("hello");
        b.intern("world");
        let mut buf = Vec::new();
        b.encode(&mut buf);
        let mut pos = 0;
        let d = Dictionary::decode(&buf, &mut pos).unwrap();
        assert_eq!(pos, buf.len());
        assert_eq!(d.get(0), Some("hello"));
        assert_eq!(d.get(1), Some("world"));
        assert_eq!(d.get(2), None);
    }
}
