//! Switchyard Store
//!
//! The built-in document store scripts reach through the `store` backend kind.
//! Documents are JSON objects grouped into collections and scoped by account;
//! every returned document carries its numeric id under `$id`.
//!
//! Selections and deletions take a query string:
//!
//! ```text
//! age >= $1 and (name.first = 'ada' or admin = true) order age desc limit 10 offset $2
//! ```
//!
//! See [`Query`] for the grammar.

mod error;
mod memory;
mod query;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use query::Query;

use async_trait::async_trait;
use serde_json::Value;

/// Field under which a document's id is reported.
pub const ID_FIELD: &str = "$id";

/// Account-scoped document storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
  /// Insert one object, or each object of an array. Returns the stored
  /// documents with their ids.
  async fn insert(&self, account_id: i64, collection: &str, object: Value) -> Result<Vec<Value>, StoreError>;

  /// Documents matching `query`, with `$n` placeholders bound from `params`.
  async fn select(
    &self,
    account_id: i64,
    collection: &str,
    query: &str,
    params: &[Value],
  ) -> Result<Vec<Value>, StoreError>;

  async fn select_by_id(&self, account_id: i64, collection: &str, id: u64) -> Result<Value, StoreError>;

  /// Replace the document `id` with `object`.
  async fn update_by_id(
    &self,
    account_id: i64,
    collection: &str,
    id: u64,
    object: Value,
  ) -> Result<Value, StoreError>;

  /// Remove and return the documents matching `query`.
  async fn delete(
    &self,
    account_id: i64,
    collection: &str,
    query: &str,
    params: &[Value],
  ) -> Result<Vec<Value>, StoreError>;

  async fn delete_by_id(&self, account_id: i64, collection: &str, id: u64) -> Result<Value, StoreError>;
}
