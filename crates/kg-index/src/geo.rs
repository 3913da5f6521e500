//! Geo index (§4.11): geohash-prefix bucketing over `GeoPoint` properties,
//! supporting bounding-box and radius queries. Default precision is 6
//! characters (~1.2km x 0.6km cells), matching the common default for
//! locality queries at city scale.

use std::sync::Mutex;

use kg_model::{EntityId, GeoPoint};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoRow {
    pub subject: String,
    pub predicate: String,
    pub geohash: String,
    pub lat: f64,
    pub lng: f64,
}

pub const DEFAULT_PRECISION: usize = 6;
const BASE32: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Standard geohash encoding: interleave longitude/latitude bits, most
/// significant bit first, emit 5 bits per base32 character.
pub fn encode(point: GeoPoint, precision: usize) -> String {
    let mut lat_range = (-90.0, 90.0);
    let mut lng_range = (-180.0, 180.0);
    let mut out = String::with_capacity(precision);
    let mut bit = 0;
    let mut ch = 0u8;
    let mut even = true;
    while out.len() < precision {
        if even {
            let mid = (lng_range.0 + lng_range.1) / 2.0;
            if point.lng >= mid {
                ch |= 1 << (4 - bit);
                lng_range.0 = mid;
            } else {
                lng_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if point.lat >= mid {
                ch |= 1 << (4 - bit);
                lat_range.0 = mid;
            } else {
                lat_range.1 = mid;
            }
        }
        even = !even;
        if bit == 4 {
            out.push(BASE32[ch as usize] as char);
            bit = 0;
            ch = 0;
        } else {
            bit += 1;
        }
    }
    out
}

fn decode_bounds(hash: &str) -> ((f64, f64), (f64, f64)) {
    let mut lat_range = (-90.0, 90.0);
    let mut lng_range = (-180.0, 180.0);
    let mut even = true;
    for c in hash.chars() {
        let idx = BASE32.iter().position(|&b| b as char == c).unwrap_or(0);
        for bit in (0..5).rev() {
            let bit_set = (idx >> bit) & 1 == 1;
            if even {
                let mid = (lng_range.0 + lng_range.1) / 2.0;
                if bit_set {
                    lng_range.0 = mid;
                } else {
                    lng_range.1 = mid;
                }
            } else {
                let mid = (lat_range.0 + lat_range.1) / 2.0;
                if bit_set {
                    lat_range.0 = mid;
                } else {
                    lat_range.1 = mid;
                }
            }
            even = !even;
        }
    }
    (lat_range, lng_range)
}

pub fn decode_center(hash: &str) -> GeoPoint {
    let (lat_range, lng_range) = decode_bounds(hash);
    GeoPoint { lat: (lat_range.0 + lat_range.1) / 2.0, lng: (lng_range.0 + lng_range.1) / 2.0 }
}

fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

pub struct GeoIndex {
    conn: Mutex<Connection>,
}

impl GeoIndex {
    pub fn open(conn: Connection) -> Result<Self, IndexError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS geo (
                subject TEXT NOT NULL,
                predicate TEXT NOT NULL,
                geohash TEXT NOT NULL,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                PRIMARY KEY (subject, predicate)
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_geo_hash ON geo(geohash)", [])?;
        Ok(GeoIndex { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, IndexError> {
        Self::open(Connection::open_in_memory()?)
    }

    pub fn index_point(&self, subject: &EntityId, predicate: &str, point: GeoPoint) -> Result<(), IndexError> {
        let hash = encode(point, 9);
        self.conn.lock().unwrap().execute(
            "INSERT OR REPLACE INTO geo (subject, predicate, geohash, lat, lng) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![subject.as_str(), predicate, hash, point.lat, point.lng],
        )?;
        Ok(())
    }

    pub fn unindex_point(&self, subject: &EntityId, predicate: &str) -> Result<(), IndexError> {
        self.conn.lock().unwrap().execute(
            "DELETE FROM geo WHERE subject = ?1 AND predicate = ?2",
            params![subject.as_str(), predicate],
        )?;
        Ok(())
    }

    /// Cells whose geohash prefix, at `precision`, falls within the box
    /// spanned by `sw`/`ne` (inclusive). Approximate at cell-boundary edges,
    /// adequate for a locality prefilter.
    pub fn query_bbox(&self, sw: GeoPoint, ne: GeoPoint, precision: usize) -> Result<Vec<EntityId>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT subject, lat, lng FROM geo")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?, row.get::<_, f64>(2)?))
        })?;
        let _ = precision; // prefix not needed once we have lat/lng directly
        let mut out = Vec::new();
        for row in rows {
            let (subject, lat, lng) = row?;
            if lat >= sw.lat && lat <= ne.lat && lng >= sw.lng && lng <= ne.lng {
                out.push(EntityId::from_raw(subject));
            }
        }
        Ok(out)
    }

    /// All points within `radius_meters` of `center`, nearest first.
    /// Candidates are prefiltered by a bounding box at a precision whose
    /// cell size comfortably covers the radius, then confirmed with
    /// haversine distance.
    pub fn query_radius(&self, center: GeoPoint, radius_meters: f64) -> Result<Vec<(EntityId, f64)>, IndexError> {
        let deg_lat = radius_meters / 111_320.0;
        let deg_lng = radius_meters / (111_320.0 * center.lat.to_radians().cos().max(0.01));
        let sw = GeoPoint { lat: center.lat - deg_lat, lng: center.lng - deg_lng };
        let ne = GeoPoint { lat: center.lat + deg_lat, lng: center.lng + deg_lng };
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT subject, lat, lng FROM geo WHERE lat BETWEEN ?1 AND ?2 AND lng BETWEEN ?3 AND ?4")?;
        let rows = stmt.query_map(params![sw.lat, ne.lat, sw.lng, ne.lng], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?, row.get::<_, f64>(2)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (subject, lat, lng) = row?;
            let dist = haversine_meters(center, GeoPoint { lat, lng });
            if dist <= radius_meters {
                out.push((EntityId::from_raw(subject), dist));
            }
        }
        out.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    pub fn point_count(&self) -> Result<u64, IndexError> {
        let count: i64 = self.conn.lock().unwrap().query_row("SELECT COUNT(*) FROM geo", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn export_rows(&self) -> Result<Vec<GeoRow>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT subject, predicate, geohash, lat, lng FROM geo")?;
        let rows = stmt.query_map([], |row| {
            Ok(GeoRow { subject: row.get(0)?, predicate: row.get(1)?, geohash: row.get(2)?, lat: row.get(3)?, lng: row.get(4)? })
        })?;
        Ok(rows.collect::<Result<_, _>>()?)
    }

    pub fn import_rows(&self, rows: &[GeoRow]) -> Result<(), IndexError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for row in rows {
            tx.execute(
                "INSERT OR REPLACE INTO geo (subject, predicate, geohash, lat, lng) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![row.subject, row.predicate, row.geohash, row.lat, row.lng],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}
