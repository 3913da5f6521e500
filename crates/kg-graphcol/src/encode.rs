use std::collections::HashMap;

use kg_model::Triple;

use crate::dict::DictBuilder;
use crate::entity_index::{EntityIndex, EntityIndexEntry};
use crate::footer::Footer;
use crate::row::encode_row;
use crate::{GraphColVersion, GCOL_MAGIC};

/// Group triples by subject (preserving first-seen subject order), and
/// within each group sort by `(predicate, timestamp desc)` so the current
/// value appears first (§4.2 encoding contract).
fn group_and_sort(triples: &[Triple]) -> Vec<&Triple> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<&str, Vec<&Triple>> = HashMap::new();
    for t in triples {
        if !groups.contains_key(t.subject.as_str()) {
            order.push(t.subject.as_str().to_string());
        }
        groups.entry(t.subject.as_str()).or_default().push(t);
    }
    let mut out = Vec::with_capacity(triples.len());
    for subject in &order {
        let group = groups.get_mut(subject.as_str()).unwrap();
        group.sort_by(|a, b| {
            a.predicate
                .as_str()
                .cmp(b.predicate.as_str())
                .then(b.timestamp.cmp(&a.timestamp))
        });
        out.extend(group.iter().copied());
    }
    out
}

/// Encode a batch of triples as a GraphCol file. `version` selects V1 (no
/// entity index/footer) or V2 (adds both, per §4.2). Only V2 is produced for
/// new writes per §6, but both remain supported encode targets for tests and
/// format-migration tooling.
pub fn encode(triples: &[Triple], version: GraphColVersion) -> Vec<u8> {
    let ordered = group_and_sort(triples);
    let min_time = ordered.iter().map(|t| t.timestamp).min().unwrap_or(0);

    let mut entities = DictBuilder::default();
    let mut predicates = DictBuilder::default();
    let mut strings = DictBuilder::default();

    // Row bytes and, for V2, the per-subject byte ranges within them.
    let mut rows = Vec::new();
    let mut index_entries: Vec<EntityIndexEntry> = Vec::new();
    let mut current_subject: Option<&str> = None;
    let mut current_start = 0usize;
    let mut current_count = 0u32;

    for t in &ordered {
        if current_subject != Some(t.subject.as_str()) {
            if let Some(subject) = current_subject.take() {
                index_entries.push(EntityIndexEntry {
                    entity_id: subject.to_string(),
                    byte_offset: current_start as u64,
                    byte_length: (rows.len() - current_start) as u64,
                    triple_count: current_count,
                });
            }
            current_subject = Some(t.subject.as_str());
            current_start = rows.len();
            current_count = 0;
        }
        encode_row(&mut rows, t, min_time, &mut entities, &mut predicates, &mut strings);
        current_count += 1;
    }
    if let Some(subject) = current_subject.take() {
        index_entries.push(EntityIndexEntry {
            entity_id: subject.to_string(),
            byte_offset: current_start as u64,
            byte_length: (rows.len() - current_start) as u64,
            triple_count: current_count,
        });
    }
    index_entries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

    let mut out = Vec::new();
    out.extend_from_slice(&GCOL_MAGIC);
    out.push(version as u8);

    let data_start = out.len();
    entities.encode(&mut out);
    predicates.encode(&mut out);
    strings.encode(&mut out);
    byteorder::WriteBytesExt::write_u64::<byteorder::LittleEndian>(&mut out, min_time).unwrap();
    byteorder::WriteBytesExt::write_u32::<byteorder::LittleEndian>(&mut out, ordered.len() as u32).unwrap();
    // Row byte offsets recorded above are relative to the start of `rows`;
    // translate them to absolute file offsets now that we know where the
    // row section begins in `out`.
    let row_section_start = out.len();
    out.extend_from_slice(&rows);
    let data_end = out.len();

    if let GraphColVersion::V2 = version {
        for entry in &mut index_entries {
            entry.byte_offset += row_section_start as u64;
        }
        let index = EntityIndex::from_sorted(index_entries.clone());
        let index_bytes = index.encode();
        let index_offset = out.len() as u64;
        out.extend_from_slice(&index_bytes);

        let checksum = crc32c::crc32c(&out[data_start..data_end]);
        let footer = Footer {
            version: version as u8,
            index_offset,
            index_length: index_bytes.len() as u64,
            entity_count: index_entries.len() as u32,
            checksum,
        };
        out.extend_from_slice(&footer.encode());
    }

    out
}
