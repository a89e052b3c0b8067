use switchyard_backend::{ConnectionCloseError, RequestError};
use switchyard_model::ModelError;
use switchyard_sandbox::SandboxError;

/// Errors that abort an endpoint invocation.
///
/// Backend failures are not among them: they come back as response data.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  #[error("configuration error: {message}")]
  Configuration { message: String },

  #[error(transparent)]
  Request(#[from] RequestError),

  #[error(transparent)]
  Script(#[from] SandboxError),

  #[error(transparent)]
  ConnectionClose(#[from] ConnectionCloseError),
}

impl EngineError {
  pub fn configuration(message: impl Into<String>) -> Self {
    Self::Configuration {
      message: message.into(),
    }
  }

  /// Whether this is the sandbox's budget-exhausted sentinel.
  pub fn is_timeout(&self) -> bool {
    matches!(self, Self::Script(e) if e.is_timeout())
  }
}

impl From<ModelError> for EngineError {
  fn from(err: ModelError) -> Self {
    Self::configuration(err.to_string())
  }
}
