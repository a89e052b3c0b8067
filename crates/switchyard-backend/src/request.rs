use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use crate::RequestError;

/// One prepared backend invocation.
///
/// Requests are immutable once built and may be performed from any task.
#[async_trait]
pub trait Request: Send + Sync {
  /// Run the call. Backend failures are reported through [`Response::error`].
  async fn perform(&self) -> Box<dyn Response>;

  /// One-line description for the dispatch log. `dev_mode` adds headers,
  /// bodies and parameters.
  fn log(&self, dev_mode: bool) -> String;

  /// The resolved request as JSON bytes.
  fn marshal(&self) -> Result<Vec<u8>, RequestError>;
}

/// The outcome of [`Request::perform`].
pub trait Response: Send {
  /// The value handed back to the script as `call.response`.
  fn to_json(&self) -> Value;

  fn log(&self) -> String;

  /// The backend error, if the call failed.
  fn error(&self) -> Option<&str>;
}

/// Response for a call that failed before producing backend data.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
  pub error: String,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self { error: error.into() }
  }

  pub fn boxed(error: impl Into<String>) -> Box<dyn Response> {
    Box::new(Self::new(error))
  }
}

impl Response for ErrorResponse {
  fn to_json(&self) -> Value {
    json!({ "error": self.error })
  }

  fn log(&self) -> String {
    self.error.clone()
  }

  fn error(&self) -> Option<&str> {
    Some(&self.error)
  }
}

/// Serialize a response struct for the script side.
pub(crate) fn to_json<T: Serialize>(value: &T) -> Value {
  serde_json::to_value(value).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

/// Serialize a request struct for [`Request::marshal`].
pub(crate) fn marshal<T: Serialize>(value: &T) -> Result<Vec<u8>, RequestError> {
  serde_json::to_vec(value).map_err(|e| RequestError::decode(e.to_string()))
}

/// Empty strings map to `None` so optional errors serialize cleanly.
pub(crate) fn non_empty(error: &str) -> Option<&str> {
  if error.is_empty() { None } else { Some(error) }
}
