use serde_json::Value;

use crate::document::DocumentId;
use crate::error::Result;

/// The document database as seen by the repositories.
///
/// Queries, updates and pipelines are MongoDB-style JSON documents, so a
/// driver-backed implementation can forward them verbatim. [`crate::Database`]
/// is the embedded implementation.
pub trait DocumentStore: Send + Sync {
    fn insert(&self, collection: &str, doc: Value) -> Result<DocumentId>;

    fn find_one(&self, collection: &str, query: &Value) -> Result<Option<Value>>;

    fn update(&self, collection: &str, query: &Value, update: &Value) -> Result<u64>;

    fn delete(&self, collection: &str, query: &Value) -> Result<u64>;

    /// Idempotent: an index over the same fields is created once.
    fn ensure_unique_index(&self, collection: &str, fields: &[&str]) -> Result<()>;

    /// Run an aggregation pipeline in one round trip.
    fn aggregate(&self, collection: &str, pipeline: &Value) -> Result<Vec<Value>>;
}
