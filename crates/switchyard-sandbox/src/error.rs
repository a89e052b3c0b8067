use thiserror::Error;

use crate::TIMEOUT_MESSAGE;

/// Errors raised while executing scripts in a sandbox.
#[derive(Debug, Error)]
pub enum SandboxError {
  /// The execution budget ran out.
  #[error("{}", TIMEOUT_MESSAGE)]
  Timeout,

  /// The script failed to compile or raised an error.
  #[error("script error: {message}")]
  Script { message: String },

  /// A value could not be moved between the script and JSON.
  #[error("conversion error: {message}")]
  Conversion { message: String },

  /// A call name is not a valid identifier in the script language.
  #[error("invalid call name '{name}'")]
  InvalidName { name: String },
}

impl SandboxError {
  pub fn script(message: impl Into<String>) -> Self {
    Self::Script {
      message: message.into(),
    }
  }

  pub fn conversion(message: impl Into<String>) -> Self {
    Self::Conversion {
      message: message.into(),
    }
  }

  /// Whether this error is the budget-exhausted sentinel.
  ///
  /// Matches on the text so a sentinel wrapped in a script traceback is still
  /// recognised.
  pub fn is_timeout(&self) -> bool {
    self.to_string().contains(TIMEOUT_MESSAGE)
  }
}
