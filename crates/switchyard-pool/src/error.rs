use crate::Driver;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
  /// Opening the backend handle failed.
  #[error("failed to connect to {driver}: {message}")]
  Connect { driver: Driver, message: String },
}

impl PoolError {
  pub fn connect(driver: Driver, err: impl std::fmt::Display) -> Self {
    Self::Connect {
      driver,
      message: err.to_string(),
    }
  }
}
