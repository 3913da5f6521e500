//! Secondary index store (C11): POS, OSP, FTS, GEO, and VEC sub-indexes
//! behind one facade, `IndexStore`.

mod error;
mod fts;
mod geo;
mod osp;
mod pos;
mod store;
mod vec;

pub use error::IndexError;
pub use fts::{tokenize, FtsDocRow, FtsIndex, FtsPostingRow};
pub use geo::{decode_center, encode as geohash_encode, GeoIndex, GeoRow, DEFAULT_PRECISION};
pub use osp::{OspIndex, OspRow};
pub use pos::{PosIndex, PosRow};
pub use store::{IndexStats, IndexStore};
pub use vec::VecIndex;
