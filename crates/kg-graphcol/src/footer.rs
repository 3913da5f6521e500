//! V2 footer + trailer (§4.2, §6): a fixed-size footer precedes an 8-byte
//! trailer magic at the very end of the file, so a reader can recover the
//! footer (and from it, the entity index) from a single suffix-range GET
//! without knowing the file size in advance.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::GraphColError;

pub const FOOTER_MAGIC: [u8; 4] = *b"GCOF";
pub const TRAILER_MAGIC: [u8; 8] = *b"GCOLTRL1";
/// Fixed size of the footer record itself, not including the trailer.
pub const GCOL_FOOTER_SIZE: usize = 4 + 1 + 3 + 8 + 8 + 4 + 4;
/// Footer + trailer together; the minimum suffix length that is guaranteed
/// to contain a full, parseable footer.
pub const GCOL_FOOTER_AND_TRAILER_SIZE: usize = GCOL_FOOTER_SIZE + TRAILER_MAGIC.len();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub version: u8,
    pub index_offset: u64,
    pub index_length: u64,
    pub entity_count: u32,
    pub checksum: u32,
}

impl Footer {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(GCOL_FOOTER_AND_TRAILER_SIZE);
        out.extend_from_slice(&FOOTER_MAGIC);
        out.push(self.version);
        out.extend_from_slice(&[0u8; 3]); // reserved
        out.write_u64::<LittleEndian>(self.index_offset).unwrap();
        out.write_u64::<LittleEndian>(self.index_length).unwrap();
        out.write_u32::<LittleEndian>(self.entity_count).unwrap();
        out.write_u32::<LittleEndian>(self.checksum).unwrap();
        out.extend_from_slice(&TRAILER_MAGIC);
        debug_assert_eq!(out.len(), GCOL_FOOTER_AND_TRAILER_SIZE);
        out
    }

    /// Recover the footer from a tail slice of the file (e.g. the last 64
    /// KiB fetched via a suffix-range GET). `tail` need not start at the
    /// footer boundary; only its final `GCOL_FOOTER_AND_TRAILER_SIZE` bytes
    /// are consulted.
    pub fn read_from_tail(tail: &[u8]) -> Result<Self, GraphColError> {
        if tail.len() < GCOL_FOOTER_AND_TRAILER_SIZE {
            return Err(GraphColError::CorruptFormat(
                "tail too short to contain a GraphCol v2 footer".into(),
            ));
        }
        let block = &tail[tail.len() - GCOL_FOOTER_AND_TRAILER_SIZE..];
        let (footer_bytes, trailer_bytes) = block.split_at(GCOL_FOOTER_SIZE);
        if trailer_bytes != TRAILER_MAGIC {
            return Err(GraphColError::CorruptFormat(
                "trailer magic not found; not a GraphCol v2 file or truncated".into(),
            ));
        }
        if footer_bytes[0..4] != FOOTER_MAGIC {
            return Err(GraphColError::CorruptFormat("footer magic mismatch".into()));
        }
        let version = footer_bytes[4];
        let mut rest = &footer_bytes[8..];
        let index_offset = rest.read_u64::<LittleEndian>().unwrap();
        let index_length = rest.read_u64::<LittleEndian>().unwrap();
        let entity_count = rest.read_u32::<LittleEndian>().unwrap();
        let checksum = rest.read_u32::<LittleEndian>().unwrap();
        Ok(Footer {
            version,
            index_offset,
            index_length,
            entity_count,
            checksum,
        })
    }
}
