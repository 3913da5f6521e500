//! Shard-local manifest cache (C7) and R2 manifest synchroniser (C8).

mod error;
mod store;
mod sync;
mod types;

pub use error::{ManifestError, SyncError};
pub use store::{ManifestStore, ManifestStoreConfig};
pub use sync::{ManifestSync, SyncDirection, SyncResult, SyncStatus};
pub use types::{EntityIndexEntry, ManifestRow, R2ChunkEntry, R2Manifest};
