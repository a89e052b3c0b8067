use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Backend kind of a remote endpoint.
///
/// The set is closed: the request registry maps each tag to a factory, and a
/// tag without a registered factory is rejected at request-build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteEndpointType {
  Http,
  Soap,
  #[serde(rename = "sqlserver")]
  SqlServer,
  Postgres,
  #[serde(rename = "mysql")]
  MySql,
  Sqlite,
  #[serde(rename = "mongodb")]
  Mongo,
  Ldap,
  Redis,
  Script,
  Store,
  Push,
  Smtp,
  CustomFunction,
  Hana,
  Oracle,
  Docker,
  Job,
  Key,
}

impl RemoteEndpointType {
  pub const ALL: [RemoteEndpointType; 19] = [
    Self::Http,
    Self::Soap,
    Self::SqlServer,
    Self::Postgres,
    Self::MySql,
    Self::Sqlite,
    Self::Mongo,
    Self::Ldap,
    Self::Redis,
    Self::Script,
    Self::Store,
    Self::Push,
    Self::Smtp,
    Self::CustomFunction,
    Self::Hana,
    Self::Oracle,
    Self::Docker,
    Self::Job,
    Self::Key,
  ];

  /// The wire tag, also used as the `__type` of script-authored payloads.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Http => "http",
      Self::Soap => "soap",
      Self::SqlServer => "sqlserver",
      Self::Postgres => "postgres",
      Self::MySql => "mysql",
      Self::Sqlite => "sqlite",
      Self::Mongo => "mongodb",
      Self::Ldap => "ldap",
      Self::Redis => "redis",
      Self::Script => "script",
      Self::Store => "store",
      Self::Push => "push",
      Self::Smtp => "smtp",
      Self::CustomFunction => "custom_function",
      Self::Hana => "hana",
      Self::Oracle => "oracle",
      Self::Docker => "docker",
      Self::Job => "job",
      Self::Key => "key",
    }
  }
}

impl fmt::Display for RemoteEndpointType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for RemoteEndpointType {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .iter()
      .copied()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| ModelError::UnknownEndpointType(s.to_string()))
  }
}

/// A backend integration descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
  pub id: i64,
  #[serde(default)]
  pub account_id: i64,
  #[serde(default)]
  pub api_id: i64,
  #[serde(default)]
  pub name: String,
  /// Default sandbox identifier for calls targeting this endpoint.
  #[serde(default)]
  pub codename: String,
  #[serde(rename = "type")]
  pub endpoint_type: RemoteEndpointType,
  /// Base configuration persisted with the endpoint.
  #[serde(default = "empty_object")]
  pub data: serde_json::Value,
  /// Override for the environment the proxy endpoint runs in.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub selected_environment_data: Option<serde_json::Value>,
}

fn empty_object() -> serde_json::Value {
  serde_json::Value::Object(serde_json::Map::new())
}
