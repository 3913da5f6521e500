//! V2 entity index (§4.2, §4.9): a sorted table of `(entityId, byteOffset,
//! byteLength, tripleCount)` appended after the data section. It enables a
//! cheap *reject* for entities absent from a chunk, without decoding the
//! data section.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::GraphColError;
use crate::varint::{read_uvarint, write_uvarint};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityIndexEntry {
    pub entity_id: String,
    pub byte_offset: u64,
    pub byte_length: u64,
    pub triple_count: u32,
}

#[derive(Debug, Clone, Default)]
pub struct EntityIndex {
    /// Sorted lexically by `entity_id`, per §4.2.
    entries: Vec<EntityIndexEntry>,
}

impl EntityIndex {
    pub fn from_sorted(entries: Vec<EntityIndexEntry>) -> Self {
        debug_assert!(entries.windows(2).all(|w| w[0].entity_id <= w[1].entity_id));
        EntityIndex { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry, in index order (sorted lexically by `entity_id`).
    pub fn entries(&self) -> impl Iterator<Item = &EntityIndexEntry> {
        self.entries.iter()
    }

    /// Binary search for an entity; `None` means the chunk definitely does
    /// not contain it (the cheap-reject path).
    pub fn lookup(&self, entity_id: &str) -> Option<&EntityIndexEntry> {
        self.entries
            .binary_search_by(|e| e.entity_id.as_str().cmp(entity_id))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_uvarint(&mut out, self.entries.len() as u64);
        for e in &self.entries {
            let bytes = e.entity_id.as_bytes();
            write_uvarint(&mut out, bytes.len() as u64);
            out.extend_from_slice(bytes);
            out.write_u64::<LittleEndian>(e.byte_offset).unwrap();
            out.write_u64::<LittleEndian>(e.byte_length).unwrap();
            out.write_u32::<LittleEndian>(e.triple_count).unwrap();
        }
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self, GraphColError> {
        let mut pos = 0usize;
        let count = read_uvarint(buf, &mut pos)
            .ok_or_else(|| GraphColError::CorruptFormat("truncated entity index count".into()))?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = read_uvarint(buf, &mut pos)
                .ok_or_else(|| GraphColError::CorruptFormat("truncated entity index entry".into()))?
                as usize;
            let end = pos + len;
            let bytes = buf
                .get(pos..end)
                .ok_or_else(|| GraphColError::CorruptFormat("entity index entity id out of bounds".into()))?;
            let entity_id = std::str::from_utf8(bytes)
                .map_err(|_| GraphColError::CorruptFormat("entity index entity id not utf8".into()))?
                .to_string();
            pos = end;
            let mut rest = &buf[pos..];
            let byte_offset = rest
                .read_u64::<LittleEndian>()
                .map_err(|_| GraphColError::CorruptFormat("truncated byte offset".into()))?;
            let byte_length = rest
                .read_u64::<LittleEndian>()
                .map_err(|_| GraphColError::CorruptFormat("truncated byte length".into()))?;
            let triple_count = rest
                .read_u32::<LittleEndian>()
                .map_err(|_| GraphColError::CorruptFormat("truncated triple count".into()))?;
            pos += 8 + 8 + 4;
            entries.push(EntityIndexEntry {
                entity_id,
                byte_offset,
                byte_length,
                triple_count,
            });
        }
        Ok(EntityIndex { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, off: u64) -> EntityIndexEntry {
        EntityIndexEntry {
            entity_id: id.to_string(),
            byte_offset: off,
            byte_length: 10,
            triple_count: 2,
        }
    }

    #[test]
    fn lookup_finds_present_rejects_absent() {
        let idx = EntityIndex::from_sorted(vec![entry("a", 0), entry("b", 10), entry("c", 20)]);
        assert_eq!(idx.lookup("b").unwrap().byte_offset, 10);
        assert!(idx.lookup("missing").is_none());
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let idx = EntityIndex::from_sorted(vec![entry("a", 0), entry("zz", 99)]);
        let bytes = idx.encode();
        let restored = EntityIndex::decode(&bytes).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.lookup("zz").unwrap().byte_length, 10);
    }
}
