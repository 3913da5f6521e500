//! Shared data model for the knowledge-graph data plane: triples, typed
//! object values, entity/predicate identifiers, transaction ids, and the
//! namespace partitioning scheme that maps entity ids to storage paths.

mod namespace;
mod triple;
mod tx_id;
mod typed_object;

pub use namespace::{namespace_of, path_transform, EmptyIdError, EntityId, Namespace, Predicate};
pub use triple::{merge_current, Triple};
pub use tx_id::{TxId, TxIdError};
pub use typed_object::{tag, GeoPoint, TypedObject};
