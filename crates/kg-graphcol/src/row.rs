//! Per-triple row encoding within the data section. Triples are grouped
//! contiguously by subject (so the V2 entity index can record a byte range
//! per entity) and dictionary/delta-encode every column (§4.2).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use kg_model::{tag, EntityId, GeoPoint, Predicate, Triple, TxId, TypedObject};

use crate::dict::{Dictionary, DictBuilder};
use crate::error::GraphColError;
use crate::varint::{read_uvarint, write_uvarint, zigzag_decode, zigzag_encode};

pub const TX_ID_WIDTH: usize = 26;

pub fn encode_row(
    out: &mut Vec<u8>,
    triple: &Triple,
    min_time: u64,
    entities: &mut DictBuilder,
    predicates: &mut DictBuilder,
    strings: &mut DictBuilder,
) {
    write_uvarint(out, entities.intern(triple.subject.as_str()) as u64);
    write_uvarint(out, predicates.intern(triple.predicate.as_str()) as u64);
    out.push(triple.object.tag());
    encode_value(out, &triple.object, entities, strings);
    let delta = triple.timestamp.saturating_sub(min_time);
    write_uvarint(out, delta);
    out.extend_from_slice(triple.tx_id.as_str().as_bytes());
}

fn encode_value(out: &mut Vec<u8>, value: &TypedObject, entities: &mut DictBuilder, strings: &mut DictBuilder) {
    match value {
        TypedObject::Null => {}
        TypedObject::Bool(b) => out.push(*b as u8),
        TypedObject::Int64(i) => write_uvarint(out, zigzag_encode(*i)),
        TypedObject::Float64(f) => out.write_f64::<LittleEndian>(*f).unwrap(),
        TypedObject::String(s) => write_uvarint(out, strings.intern(s) as u64),
        TypedObject::Ref(id) => write_uvarint(out, entities.intern(id.as_str()) as u64),
        TypedObject::RefArray(ids) => {
            write_uvarint(out, ids.len() as u64);
            for id in ids {
                write_uvarint(out, entities.intern(id.as_str()) as u64);
            }
        }
        TypedObject::Timestamp(t) => write_uvarint(out, *t),
        TypedObject::Date(d) => write_uvarint(out, strings.intern(d) as u64),
        TypedObject::Json(v) => write_uvarint(out, strings.intern(&v.to_string()) as u64),
        TypedObject::GeoPoint(g) => {
            out.write_f64::<LittleEndian>(g.lat).unwrap();
            out.write_f64::<LittleEndian>(g.lng).unwrap();
        }
        TypedObject::Url(u) => write_uvarint(out, strings.intern(u) as u64),
    }
}

pub fn decode_row(
    buf: &[u8],
    pos: &mut usize,
    min_time: u64,
    entities: &Dictionary,
    predicates: &Dictionary,
    strings: &Dictionary,
) -> Result<Triple, GraphColError> {
    let err = || GraphColError::CorruptFormat("truncated row".into());
    let subject_code = read_uvarint(buf, pos).ok_or_else(err)? as u32;
    let predicate_code = read_uvarint(buf, pos).ok_or_else(err)? as u32;
    let subject = entities
        .get(subject_code)
        .ok_or_else(|| GraphColError::CorruptFormat("subject code out of range".into()))?;
    let predicate = predicates
        .get(predicate_code)
        .ok_or_else(|| GraphColError::CorruptFormat("predicate code out of range".into()))?;
    let tag_byte = *buf.get(*pos).ok_or_else(err)?;
    *pos += 1;
    let object = decode_value(tag_byte, buf, pos, entities, strings)?;
    let delta = read_uvarint(buf, pos).ok_or_else(err)?;
    let timestamp = min_time + delta;
    let tx_bytes = buf
        .get(*pos..*pos + TX_ID_WIDTH)
        .ok_or_else(|| GraphColError::CorruptFormat("truncated tx id".into()))?;
    *pos += TX_ID_WIDTH;
    let tx_str = std::str::from_utf8(tx_bytes).map_err(|_| GraphColError::CorruptFormat("tx id not utf8".into()))?;
    let tx_id = TxId::try_from(tx_str).map_err(|e| GraphColError::CorruptFormat(e.to_string()))?;

    Ok(Triple {
        subject: EntityId::from_raw(subject),
        predicate: Predicate::from_raw(predicate),
        object,
        timestamp,
        tx_id,
    })
}

fn decode_value(
    tag_byte: u8,
    buf: &[u8],
    pos: &mut usize,
    entities: &Dictionary,
    strings: &Dictionary,
) -> Result<TypedObject, GraphColError> {
    let err = || GraphColError::CorruptFormat("truncated value".into());
    Ok(match tag_byte {
        tag::NULL => TypedObject::Null,
        tag::BOOL => {
            let b = *buf.get(*pos).ok_or_else(err)?;
            *pos += 1;
            TypedObject::Bool(b != 0)
        }
        tag::INT64 => TypedObject::Int64(zigzag_decode(read_uvarint(buf, pos).ok_or_else(err)?)),
        tag::FLOAT64 => {
            let mut slice = buf.get(*pos..*pos + 8).ok_or_else(err)?;
            *pos += 8;
            TypedObject::Float64(slice.read_f64::<LittleEndian>().unwrap())
        }
        tag::STRING => {
            let code = read_uvarint(buf, pos).ok_or_else(err)? as u32;
            TypedObject::String(
                strings
                    .get(code)
                    .ok_or_else(|| GraphColError::CorruptFormat("string code out of range".into()))?
                    .to_string(),
            )
        }
        tag::REF => {
            let code = read_uvarint(buf, pos).ok_or_else(err)? as u32;
            TypedObject::Ref(EntityId::from_raw(
                entities
                    .get(code)
                    .ok_or_else(|| GraphColError::CorruptFormat("ref code out of range".into()))?,
            ))
        }
        tag::REF_ARRAY => {
            let count = read_uvarint(buf, pos).ok_or_else(err)?;
            let mut ids = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let code = read_uvarint(buf, pos).ok_or_else(err)? as u32;
                ids.push(EntityId::from_raw(
                    entities
                        .get(code)
                        .ok_or_else(|| GraphColError::CorruptFormat("ref array code out of range".into()))?,
                ));
            }
            TypedObject::RefArray(ids)
        }
        tag::TIMESTAMP => TypedObject::Timestamp(read_uvarint(buf, pos).ok_or_else(err)?),
        tag::DATE => {
            let code = read_uvarint(buf, pos).ok_or_else(err)? as u32;
            TypedObject::Date(
                strings
                    .get(code)
                    .ok_or_else(|| GraphColError::CorruptFormat("date code out of range".into()))?
                    .to_string(),
            )
        }
        tag::JSON => {
            let code = read_uvarint(buf, pos).ok_or_else(err)? as u32;
            let raw = strings
                .get(code)
                .ok_or_else(|| GraphColError::CorruptFormat("json code out of range".into()))?;
            TypedObject::Json(
                serde_json::from_str(raw).map_err(|e| GraphColError::CorruptFormat(format!("bad json literal: {e}")))?,
            )
        }
        tag::GEO_POINT => {
            let mut slice = buf.get(*pos..*pos + 16).ok_or_else(err)?;
            *pos += 16;
            let lat = slice.read_f64::<LittleEndian>().unwrap();
            let lng = slice.read_f64::<LittleEndian>().unwrap();
            TypedObject::GeoPoint(GeoPoint { lat, lng })
        }
        tag::URL => {
            let code = read_uvarint(buf, pos).ok_or_else(err)? as u32;
            TypedObject::Url(
                strings
                    .get(code)
                    .ok_or_else(|| GraphColError::CorruptFormat("url code out of range".into()))?
                    .to_string(),
            )
        }
        other => return Err(GraphColError::UnsupportedVersion(other as u32)),
    })
}
