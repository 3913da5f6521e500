//! The shard-local durable key/value contract (§6): `DurableKv`, an
//! in-memory implementation, and a `rusqlite`-backed implementation.

mod error;
mod memory;
mod sqlite;
mod store;

pub use error::DurableKvError;
pub use memory::InMemoryDurableKv;
pub use sqlite::SqliteDurableKv;
pub use store::{DurableKv, DurableKvExt};
