use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use switchyard_pool::{ConnectionPool, ConnectionSpec, Driver};

use super::userinfo;
use crate::registry::acquire;
use crate::request::{marshal, to_json};
use crate::{BuildContext, ErrorResponse, Request, RequestError, RequestFactory, Response, overlay};

const DEFAULT_PORT: u16 = 6379;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RedisConfig {
  pub connection_string: String,
  pub username: String,
  pub password: String,
  pub host: String,
  pub port: u16,
  pub database: u32,
}

impl RedisConfig {
  pub fn dsn(&self) -> Result<String, RequestError> {
    if !self.connection_string.is_empty() {
      return Ok(self.connection_string.clone());
    }
    if self.host.is_empty() {
      return Err(RequestError::validation("redis config requires a host"));
    }

    let credentials = userinfo(&self.username, &self.password)?;
    let port = if self.port == 0 { DEFAULT_PORT } else { self.port };
    Ok(format!("redis://{credentials}{}:{port}/{}", self.host, self.database))
  }
}

/// Script-facing shape of a key/value call: `parameters[0]` is the command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSpec {
  pub config: RedisConfig,
  pub parameters: Vec<Value>,
}

impl RedisSpec {
  fn command(&self) -> Result<&str, RequestError> {
    match self.parameters.first() {
      None => Err(RequestError::validation("missing command parameter")),
      Some(Value::String(command)) if !command.is_empty() => Ok(command),
      Some(_) => Err(RequestError::validation("invalid command parameter type")),
    }
  }
}

fn argument(value: &Value) -> String {
  match value {
    Value::String(text) => text.clone(),
    Value::Bool(flag) => String::from(if *flag { "1" } else { "0" }),
    other => other.to_string(),
  }
}

/// Convert a reply to JSON. Bulk strings are read as UTF-8.
pub fn reply_to_json(value: redis::Value) -> Value {
  match value {
    redis::Value::Nil => Value::Null,
    redis::Value::Int(integer) => Value::from(integer),
    redis::Value::BulkString(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
    redis::Value::Array(items) | redis::Value::Set(items) => {
      Value::Array(items.into_iter().map(reply_to_json).collect())
    }
    redis::Value::SimpleString(text) => Value::String(text),
    redis::Value::Okay => Value::String("OK".to_string()),
    redis::Value::Map(pairs) => {
      let mut object = Map::new();
      for (key, value) in pairs {
        let key = match reply_to_json(key) {
          Value::String(text) => text,
          other => other.to_string(),
        };
        object.insert(key, reply_to_json(value));
      }
      Value::Object(object)
    }
    redis::Value::Double(float) => Value::from(float),
    redis::Value::Boolean(flag) => Value::Bool(flag),
    redis::Value::VerbatimString { text, .. } => Value::String(text),
    other => Value::String(format!("{other:?}")),
  }
}

pub struct RedisRequest {
  spec: RedisSpec,
  connection: Arc<ConnectionManager>,
}

#[derive(Debug, Serialize)]
pub struct RedisResponse {
  pub data: Vec<Value>,
}

impl Response for RedisResponse {
  fn to_json(&self) -> Value {
    to_json(self)
  }

  fn log(&self) -> String {
    format!("Values: {}", self.data.len())
  }

  fn error(&self) -> Option<&str> {
    None
  }
}

#[async_trait]
impl Request for RedisRequest {
  async fn perform(&self) -> Box<dyn Response> {
    let Ok(command) = self.spec.command() else {
      return ErrorResponse::boxed("missing command parameter");
    };
    let mut cmd = redis::cmd(command);
    for value in &self.spec.parameters[1..] {
      cmd.arg(argument(value));
    }

    let mut connection = ConnectionManager::clone(&self.connection);
    let reply: redis::RedisResult<redis::Value> = cmd.query_async(&mut connection).await;
    match reply {
      Ok(reply) => {
        let data = match reply_to_json(reply) {
          Value::Array(items) => items,
          single => vec![single],
        };
        Box::new(RedisResponse { data })
      }
      Err(e) => ErrorResponse::boxed(format!("redis {command} failed: {e}")),
    }
  }

  fn log(&self, _dev_mode: bool) -> String {
    self
      .spec
      .parameters
      .iter()
      .map(argument)
      .collect::<Vec<_>>()
      .join(" ")
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    marshal(&self.spec)
  }
}

pub struct RedisFactory {
  pool: Option<Arc<ConnectionPool>>,
}

impl RedisFactory {
  pub fn new(pool: Option<Arc<ConnectionPool>>) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl RequestFactory for RedisFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let spec: RedisSpec = overlay::resolve(ctx.remote_endpoint, ctx.payload)?;
    spec.command()?;
    let connection = ConnectionSpec::new(Driver::Redis, spec.config.dsn()?);
    let connection = acquire::<ConnectionManager>(self.pool.as_deref(), &connection).await?;
    Ok(Arc::new(RedisRequest { spec, connection }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_dsn() {
    let config: RedisConfig = serde_json::from_value(json!({
      "host": "cache",
      "password": "pw",
      "database": 2
    }))
    .unwrap();
    assert_eq!(config.dsn().unwrap(), "redis://:pw@cache:6379/2");
  }

  #[test]
  fn test_command_validation() {
    let spec = |parameters: Value| RedisSpec {
      parameters: serde_json::from_value(parameters).unwrap(),
      ..Default::default()
    };
    assert_eq!(spec(json!(["GET", "k"])).command().unwrap(), "GET");
    assert!(spec(json!([])).command().unwrap_err().to_string().contains("missing command parameter"));
    assert!(spec(json!([5])).command().unwrap_err().to_string().contains("invalid command parameter type"));
  }

  #[test]
  fn test_reply_conversion() {
    let reply = redis::Value::Array(vec![
      redis::Value::BulkString(b"ada".to_vec()),
      redis::Value::Int(3),
      redis::Value::Nil,
      redis::Value::Okay,
    ]);
    assert_eq!(reply_to_json(reply), json!(["ada", 3, null, "OK"]));

    let map = redis::Value::Map(vec![(
      redis::Value::SimpleString("field".to_string()),
      redis::Value::Boolean(true),
    )]);
    assert_eq!(reply_to_json(map), json!({ "field": true }));
  }
}
