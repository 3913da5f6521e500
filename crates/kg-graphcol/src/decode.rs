use byteorder::{LittleEndian, ReadBytesExt};
use kg_model::Triple;

use crate::dict::Dictionary;
use crate::entity_index::EntityIndex;
use crate::error::GraphColError;
use crate::footer::Footer;
use crate::row::decode_row;
use crate::{GraphColVersion, GCOL_MAGIC};

struct DataSection {
    min_time: u64,
    row_count: u32,
    entities: Dictionary,
    predicates: Dictionary,
    strings: Dictionary,
    rows_start: usize,
}

fn parse_header(bytes: &[u8]) -> Result<GraphColVersion, GraphColError> {
    if bytes.len() < 5 || bytes[0..4] != GCOL_MAGIC {
        return Err(GraphColError::CorruptFormat("missing GraphCol magic header".into()));
    }
    GraphColVersion::from_u8(bytes[4]).ok_or(GraphColError::UnsupportedVersion(bytes[4] as u32))
}

fn parse_data_section(bytes: &[u8], start: usize) -> Result<DataSection, GraphColError> {
    let mut pos = start;
    let entities = Dictionary::decode(bytes, &mut pos)
        .ok_or_else(|| GraphColError::CorruptFormat("truncated entity dictionary".into()))?;
    let predicates = Dictionary::decode(bytes, &mut pos)
        .ok_or_else(|| GraphColError::CorruptFormat("truncated predicate dictionary".into()))?;
    let strings = Dictionary::decode(bytes, &mut pos)
        .ok_or_else(|| GraphColError::CorruptFormat("truncated string dictionary".into()))?;
    let mut rest = bytes
        .get(pos..pos + 12)
        .ok_or_else(|| GraphColError::CorruptFormat("truncated data section scalars".into()))?;
    let min_time = rest.read_u64::<LittleEndian>().unwrap();
    let row_count = rest.read_u32::<LittleEndian>().unwrap();
    pos += 12;
    Ok(DataSection {
        min_time,
        row_count,
        entities,
        predicates,
        strings,
        rows_start: pos,
    })
}

/// Full decode: verify magic/version/checksum, reconstruct dictionaries,
/// materialize triples in storage order (§4.2 decode contract).
pub fn decode(bytes: &[u8]) -> Result<Vec<Triple>, GraphColError> {
    let version = parse_header(bytes)?;
    if let GraphColVersion::V2 = version {
        verify_checksum(bytes)?;
    }
    let section = parse_data_section(bytes, 5)?;
    let mut pos = section.rows_start;
    let mut out = Vec::with_capacity(section.row_count as usize);
    for _ in 0..section.row_count {
        out.push(decode_row(
            bytes,
            &mut pos,
            section.min_time,
            &section.entities,
            &section.predicates,
            &section.strings,
        )?);
    }
    Ok(out)
}

fn verify_checksum(bytes: &[u8]) -> Result<(), GraphColError> {
    let footer = Footer::read_from_tail(bytes)?;
    let data_start = 5usize;
    let data_end = footer.index_offset as usize;
    let data = bytes
        .get(data_start..data_end)
        .ok_or_else(|| GraphColError::CorruptFormat("footer index_offset out of bounds".into()))?;
    let computed = crc32c::crc32c(data);
    if computed != footer.checksum {
        return Err(GraphColError::ChecksumMismatch {
            expected: footer.checksum,
            computed,
        });
    }
    Ok(())
}

/// Read just the footer from a tail slice (e.g. a suffix-range GET of the
/// last 64 KiB), per §4.9 `lookupV2` step 1.
pub fn read_footer(tail: &[u8]) -> Result<Footer, GraphColError> {
    Footer::read_from_tail(tail)
}

/// Decode the entity index from its bytes (typically sliced out of the
/// same tail fetch that produced the footer, when the index is small
/// enough to fit in it; otherwise a follow-up range fetch covering
/// `[index_offset, index_offset + index_length)`).
pub fn decode_entity_index(index_bytes: &[u8]) -> Result<EntityIndex, GraphColError> {
    EntityIndex::decode(index_bytes)
}

/// Decode only one entity's triples from a fully-fetched chunk, using the
/// entity index to locate its byte range. Dictionaries are chunk-global, so
/// this still requires the full data section to resolve dictionary codes
/// (§4.2 design note) — the index's value is the cheap *reject* when the
/// entity is absent, not avoiding the data fetch for present entities.
pub fn decode_entity(
    full_bytes: &[u8],
    index: &EntityIndex,
    entity_id: &str,
) -> Result<Option<Vec<Triple>>, GraphColError> {
    let Some(entry) = index.lookup(entity_id) else {
        return Ok(None);
    };
    parse_header(full_bytes)?;
    let section = parse_data_section(full_bytes, 5)?;
    let mut pos = entry.byte_offset as usize;
    let end = pos + entry.byte_length as usize;
    let mut out = Vec::with_capacity(entry.triple_count as usize);
    while pos < end {
        out.push(decode_row(
            full_bytes,
            &mut pos,
            section.min_time,
            &section.entities,
            &section.predicates,
            &section.strings,
        )?);
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use kg_model::{Triple, TxId, TypedObject};

    fn triple(subject: &str, predicate: &str, ts: u64) -> Triple {
        Triple {
            subject: subject.parse().unwrap(),
            predicate: predicate.parse().unwrap(),
            object: TypedObject::String(format!("{subject}-{predicate}-{ts}")),
            timestamp: ts,
            tx_id: TxId::from_parts(ts, 0),
        }
    }

    #[test]
    fn round_trip_preserves_canonical_order_v1() {
        let triples = vec![triple("s1", "p1", 1), triple("s1", "p1", 2), triple("s2", "p1", 1)];
        let bytes = encode(&triples, GraphColVersion::V1);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].subject.as_str(), "s1");
        assert_eq!(decoded[0].timestamp, 2); // newest first within subject/predicate
    }

    #[test]
    fn round_trip_preserves_canonical_order_v2() {
        let triples = vec![triple("a", "p", 5), triple("b", "p", 1)];
        let bytes = encode(&triples, GraphColVersion::V2);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn detects_checksum_mismatch() {
        let triples = vec![triple("a", "p", 1)];
        let mut bytes = encode(&triples, GraphColVersion::V2);
        let last = bytes.len() - 1;
        bytes[5] ^= 0xFF; // corrupt a byte inside the data section
        let _ = last;
        assert!(matches!(decode(&bytes), Err(GraphColError::ChecksumMismatch { .. })));
    }

    #[test]
    fn entity_index_rejects_absent_without_decoding() {
        let triples = vec![triple("present", "p", 1)];
        let bytes = encode(&triples, GraphColVersion::V2);
        let footer = read_footer(&bytes).unwrap();
        let index_bytes = &bytes[footer.index_offset as usize..(footer.index_offset + footer.index_length) as usize];
        let index = decode_entity_index(index_bytes).unwrap();
        assert!(decode_entity(&bytes, &index, "absent").unwrap().is_none());
        let found = decode_entity(&bytes, &index, "present").unwrap().unwrap();
        assert_eq!(found.len(), 1);
    }
}
