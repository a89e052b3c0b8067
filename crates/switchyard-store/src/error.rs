/// Errors returned by document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("collection '{0}' does not exist")]
  CollectionNotFound(String),

  #[error("document {id} not found in '{collection}'")]
  NotFound { collection: String, id: u64 },

  /// The query failed to parse or bind its parameters.
  #[error("invalid query: {message}")]
  Query { message: String },

  #[error("invalid document: {message}")]
  InvalidDocument { message: String },
}

impl StoreError {
  pub fn query(message: impl Into<String>) -> Self {
    Self::Query {
      message: message.into(),
    }
  }

  pub fn invalid_document(message: impl Into<String>) -> Self {
    Self::InvalidDocument {
      message: message.into(),
    }
  }
}
