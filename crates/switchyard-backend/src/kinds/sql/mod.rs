//! SQL family (postgres, mysql, sqlite) over the sqlx `Any` driver.

mod convert;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Column, Row};
use switchyard_pool::{ConnectionPool, ConnectionSpec, Driver};
use tracing::warn;

pub use convert::normalize_parameters;

use super::userinfo;
use crate::registry::acquire;
use crate::request::{marshal, to_json};
use crate::{BuildContext, ErrorResponse, Request, RequestError, RequestFactory, Response, overlay};

/// Connection settings. `connectionString` wins over the individual fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SqlConfig {
  pub connection_string: String,
  #[serde(alias = "server")]
  pub host: String,
  pub port: u16,
  #[serde(alias = "username")]
  pub user: String,
  pub password: String,
  pub dbname: String,
  pub sslmode: String,
  /// Database file for sqlite.
  pub file: String,
}

impl SqlConfig {
  pub fn dsn(&self, driver: Driver) -> Result<String, RequestError> {
    if !self.connection_string.is_empty() {
      return Ok(self.connection_string.clone());
    }

    match driver {
      Driver::Sqlite => {
        if self.file.is_empty() {
          return Err(RequestError::validation("sqlite config requires a file"));
        }
        if self.file == ":memory:" {
          Ok("sqlite::memory:".to_string())
        } else {
          Ok(format!("sqlite://{}?mode=rwc", self.file))
        }
      }
      Driver::Postgres | Driver::MySql => {
        if self.host.is_empty() {
          return Err(RequestError::validation(format!("{driver} config requires a host")));
        }
        let (scheme, default_port) = if driver == Driver::Postgres {
          ("postgres", 5432)
        } else {
          ("mysql", 3306)
        };
        let port = if self.port == 0 { default_port } else { self.port };
        let credentials = userinfo(&self.user, &self.password)?;
        let mut dsn = format!("{scheme}://{credentials}{}:{port}/{}", self.host, self.dbname);
        if driver == Driver::Postgres {
          let sslmode = if self.sslmode.is_empty() {
            "prefer"
          } else {
            &self.sslmode
          };
          dsn.push_str(&format!("?sslmode={sslmode}"));
        }
        Ok(dsn)
      }
      Driver::Mongo | Driver::Redis => Err(RequestError::configuration(format!("{driver} is not a SQL driver"))),
    }
  }
}

/// Script-facing shape of a SQL call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SqlSpec {
  pub config: SqlConfig,
  pub query_statement: String,
  pub execute_statement: String,
  pub parameters: Vec<Value>,
  pub transactions: bool,
  pub max_open_conn: u32,
  pub max_idle_conn: u32,
}

impl SqlSpec {
  pub fn connection_spec(&self, driver: Driver) -> Result<ConnectionSpec, RequestError> {
    let mut spec = ConnectionSpec::new(driver, self.config.dsn(driver)?);
    spec.max_open = self.max_open_conn;
    spec.max_idle = self.max_idle_conn;
    Ok(spec)
  }
}

pub struct SqlRequest {
  spec: SqlSpec,
  pool: Arc<AnyPool>,
}

impl SqlRequest {
  /// Validate `spec` and normalise its parameters.
  pub fn new(mut spec: SqlSpec, pool: Arc<AnyPool>) -> Result<Self, RequestError> {
    if spec.query_statement.is_empty() && spec.execute_statement.is_empty() {
      return Err(RequestError::validation("no SQL query or execute specified"));
    }
    spec.parameters = normalize_parameters(&spec.parameters)?;
    Ok(Self { spec, pool })
  }

  fn statement(&self) -> &str {
    if self.spec.query_statement.is_empty() {
      &self.spec.execute_statement
    } else {
      &self.spec.query_statement
    }
  }

  fn bound(&self) -> Query<'_, Any, AnyArguments<'_>> {
    self
      .spec
      .parameters
      .iter()
      .fold(sqlx::query(self.statement()), |query, parameter| match parameter {
        Value::Null => query.bind(None::<String>),
        Value::Bool(flag) => query.bind(*flag),
        Value::Number(number) => match number.as_i64() {
          Some(integer) => query.bind(integer),
          None => query.bind(number.as_f64().unwrap_or_default()),
        },
        Value::String(text) => query.bind(text.clone()),
        other => query.bind(other.to_string()),
      })
  }

  async fn query(&self) -> Result<SqlResponse, sqlx::Error> {
    let rows = if self.spec.transactions {
      let mut tx = self.pool.begin().await?;
      match self.bound().fetch_all(&mut *tx).await {
        Ok(rows) => {
          tx.commit().await?;
          rows
        }
        Err(e) => {
          rollback(tx).await;
          return Err(e);
        }
      }
    } else {
      self.bound().fetch_all(&*self.pool).await?
    };

    Ok(SqlResponse {
      data: Some(rows.iter().map(row_to_json).collect()),
      ..Default::default()
    })
  }

  async fn execute(&self) -> Result<SqlResponse, sqlx::Error> {
    let result = if self.spec.transactions {
      let mut tx = self.pool.begin().await?;
      match self.bound().execute(&mut *tx).await {
        Ok(result) => {
          tx.commit().await?;
          result
        }
        Err(e) => {
          rollback(tx).await;
          return Err(e);
        }
      }
    } else {
      self.bound().execute(&*self.pool).await?
    };

    Ok(SqlResponse {
      insert_id: result.last_insert_id(),
      rows_affected: Some(result.rows_affected()),
      ..Default::default()
    })
  }
}

async fn rollback(tx: sqlx::Transaction<'_, Any>) {
  if let Err(e) = tx.rollback().await {
    warn!(error = %e, "sql_rollback_failed");
  }
}

fn row_to_json(row: &AnyRow) -> Map<String, Value> {
  row
    .columns()
    .iter()
    .map(|column| (column.name().to_string(), column_value(row, column.ordinal())))
    .collect()
}

/// Decode a column by probing the types the `Any` driver can produce.
fn column_value(row: &AnyRow, index: usize) -> Value {
  if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
    return value.map_or(Value::Null, Value::from);
  }
  if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
    return value.map_or(Value::Null, Value::from);
  }
  if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
    return value.map_or(Value::Null, Value::from);
  }
  if let Ok(value) = row.try_get::<Option<String>, _>(index) {
    return value.map_or(Value::Null, Value::from);
  }
  if let Ok(value) = row.try_get::<Option<Vec<u8>>, _>(index) {
    return value.map_or(Value::Null, |bytes| {
      Value::String(String::from_utf8_lossy(&bytes).into_owned())
    });
  }
  Value::Null
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlResponse {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<Vec<Map<String, Value>>>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub insert_id: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub rows_affected: Option<u64>,
}

impl Response for SqlResponse {
  fn to_json(&self) -> Value {
    to_json(self)
  }

  fn log(&self) -> String {
    match &self.data {
      Some(rows) => format!("Records found: {}", rows.len()),
      None => format!("Records affected: {}", self.rows_affected.unwrap_or_default()),
    }
  }

  fn error(&self) -> Option<&str> {
    None
  }
}

#[async_trait]
impl Request for SqlRequest {
  async fn perform(&self) -> Box<dyn Response> {
    let result = if self.spec.query_statement.is_empty() {
      self.execute().await
    } else {
      self.query().await
    };
    match result {
      Ok(response) => Box::new(response),
      Err(e) => ErrorResponse::boxed(format!("sql statement failed: {e}")),
    }
  }

  fn log(&self, dev_mode: bool) -> String {
    let mut line = self.statement().to_string();
    if dev_mode {
      line.push_str(&format!(
        "\nParameters: {}\nTransactional: {}",
        Value::Array(self.spec.parameters.clone()),
        self.spec.transactions
      ));
    }
    line
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    marshal(&self.spec)
  }
}

pub struct SqlFactory {
  driver: Driver,
  pool: Option<Arc<ConnectionPool>>,
}

impl SqlFactory {
  pub fn new(driver: Driver, pool: Option<Arc<ConnectionPool>>) -> Self {
    Self { driver, pool }
  }
}

#[async_trait]
impl RequestFactory for SqlFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let spec: SqlSpec = overlay::resolve(ctx.remote_endpoint, ctx.payload)?;
    let connection = spec.connection_spec(self.driver)?;
    let pool = acquire::<AnyPool>(self.pool.as_deref(), &connection).await?;
    Ok(Arc::new(SqlRequest::new(spec, pool)?))
  }
}
