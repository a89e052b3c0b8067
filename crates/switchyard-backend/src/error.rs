//! Request construction errors.

/// Errors raised while turning a script payload into a [`Request`](crate::Request).
///
/// Failures while *performing* a request are never errors; they travel as the
/// `error` field of the response.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
  /// A configuration layer is not a JSON object or a field has the wrong type.
  #[error("unable to decode request: {message}")]
  Decode { message: String },

  /// A required field is missing or holds an unusable value.
  #[error("invalid request: {message}")]
  Validation { message: String },

  /// The environment cannot serve this request: disabled kind, missing
  /// collaborator, failed connection.
  #[error("configuration error: {message}")]
  Configuration { message: String },
}

impl RequestError {
  pub fn decode(message: impl Into<String>) -> Self {
    Self::Decode {
      message: message.into(),
    }
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self::Validation {
      message: message.into(),
    }
  }

  pub fn configuration(message: impl Into<String>) -> Self {
    Self::Configuration {
      message: message.into(),
    }
  }
}
