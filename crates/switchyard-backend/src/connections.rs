use std::any::Any;
use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, warn};

/// A stateful backend handle that lives for one invocation.
#[async_trait]
pub trait StickyConnection: Send + Sync {
  async fn close(&mut self) -> Result<(), String>;

  fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, thiserror::Error)]
#[error("failed to close connection for remote endpoint {remote_endpoint_id}: {message}")]
pub struct ConnectionCloseError {
  pub remote_endpoint_id: i64,
  pub message: String,
}

/// Open sticky connections of one invocation, keyed by remote endpoint id.
#[derive(Default)]
pub struct ConnectionRegistry {
  connections: HashMap<i64, Box<dyn StickyConnection>>,
}

impl ConnectionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// The open connection for `remote_endpoint_id`, if it is a `T`.
  pub fn get<T: 'static>(&self, remote_endpoint_id: i64) -> Option<&T> {
    self
      .connections
      .get(&remote_endpoint_id)
      .and_then(|connection| connection.as_any().downcast_ref::<T>())
  }

  pub fn insert(&mut self, remote_endpoint_id: i64, connection: Box<dyn StickyConnection>) {
    self.connections.insert(remote_endpoint_id, connection);
  }

  pub fn len(&self) -> usize {
    self.connections.len()
  }

  pub fn is_empty(&self) -> bool {
    self.connections.is_empty()
  }

  /// Close every connection and empty the registry. All connections are
  /// attempted; the first failure is returned.
  pub async fn close_all(&mut self) -> Result<(), ConnectionCloseError> {
    let mut first_error = None;
    for (remote_endpoint_id, mut connection) in self.connections.drain() {
      match connection.close().await {
        Ok(()) => debug!(remote_endpoint_id, "connection_closed"),
        Err(message) => {
          warn!(remote_endpoint_id, error = %message, "connection_close_failed");
          first_error.get_or_insert(ConnectionCloseError {
            remote_endpoint_id,
            message,
          });
        }
      }
    }
    first_error.map_or(Ok(()), Err)
  }
}
