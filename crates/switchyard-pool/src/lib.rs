//! Switchyard Pool
//!
//! Long-lived backend handles shared across requests. Handles are keyed by
//! driver and DSN and returned type-erased; the caller downcasts to the
//! concrete handle its driver produces:
//!
//! | driver | handle |
//! |---|---|
//! | `Postgres`, `MySql`, `Sqlite` | `sqlx::AnyPool` |
//! | `Mongo` | `mongodb::Client` |
//! | `Redis` | `redis::aio::ConnectionManager` |

mod error;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use sqlx::any::AnyPoolOptions;
use tracing::{debug, info};

pub use error::PoolError;

/// A type-erased, shareable backend handle.
pub type Connection = Arc<dyn Any + Send + Sync>;

const DEFAULT_MAX_OPEN: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Driver {
  Postgres,
  MySql,
  Sqlite,
  Mongo,
  Redis,
}

impl fmt::Display for Driver {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Driver::Postgres => "postgres",
      Driver::MySql => "mysql",
      Driver::Sqlite => "sqlite",
      Driver::Mongo => "mongodb",
      Driver::Redis => "redis",
    };
    f.write_str(name)
  }
}

/// What to connect to and how large the underlying pool may grow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSpec {
  pub driver: Driver,
  pub dsn: String,
  /// Upper bound on open connections. Zero means the default.
  pub max_open: u32,
  /// Connections kept warm while idle.
  pub max_idle: u32,
}

impl ConnectionSpec {
  pub fn new(driver: Driver, dsn: impl Into<String>) -> Self {
    Self {
      driver,
      dsn: dsn.into(),
      max_open: 0,
      max_idle: 0,
    }
  }

  fn key(&self) -> (Driver, String) {
    (self.driver, self.dsn.clone())
  }
}

/// Process-wide registry of backend handles.
#[derive(Default)]
pub struct ConnectionPool {
  handles: DashMap<(Driver, String), Connection>,
}

impl ConnectionPool {
  pub fn new() -> Self {
    Self::default()
  }

  /// Return the handle for `spec`, opening it on first use.
  pub async fn connect(&self, spec: &ConnectionSpec) -> Result<Connection, PoolError> {
    let key = spec.key();
    if let Some(handle) = self.handles.get(&key) {
      return Ok(Arc::clone(handle.value()));
    }

    let handle = open(spec).await?;
    info!(driver = %spec.driver, "connection_opened");

    // Another request may have raced us here; keep whichever landed first.
    let handle = self.handles.entry(key).or_insert(handle);
    Ok(Arc::clone(handle.value()))
  }

  /// Seed a handle for `spec`, replacing any existing one.
  pub fn insert(&self, spec: &ConnectionSpec, handle: Connection) {
    self.handles.insert(spec.key(), handle);
  }

  /// Evict the handle for `spec`. The next `connect` reopens it.
  pub fn flush(&self, spec: &ConnectionSpec) -> bool {
    let evicted = self.handles.remove(&spec.key()).is_some();
    if evicted {
      debug!(driver = %spec.driver, "connection_flushed");
    }
    evicted
  }

  pub fn len(&self) -> usize {
    self.handles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handles.is_empty()
  }
}

async fn open(spec: &ConnectionSpec) -> Result<Connection, PoolError> {
  match spec.driver {
    Driver::Postgres | Driver::MySql | Driver::Sqlite => {
      sqlx::any::install_default_drivers();
      let max_open = if spec.max_open == 0 {
        DEFAULT_MAX_OPEN
      } else {
        spec.max_open
      };
      let pool = AnyPoolOptions::new()
        .max_connections(max_open)
        .min_connections(spec.max_idle.min(max_open))
        .connect(&spec.dsn)
        .await
        .map_err(|e| PoolError::connect(spec.driver, e))?;
      Ok(Arc::new(pool))
    }
    Driver::Mongo => {
      let client = mongodb::Client::with_uri_str(&spec.dsn)
        .await
        .map_err(|e| PoolError::connect(spec.driver, e))?;
      Ok(Arc::new(client))
    }
    Driver::Redis => {
      let client = redis::Client::open(spec.dsn.as_str()).map_err(|e| PoolError::connect(spec.driver, e))?;
      let manager = redis::aio::ConnectionManager::new(client)
        .await
        .map_err(|e| PoolError::connect(spec.driver, e))?;
      Ok(Arc::new(manager))
    }
  }
}
