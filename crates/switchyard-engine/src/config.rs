use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use switchyard_backend::FunctionSpec;
use switchyard_model::RemoteEndpointType;

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// Include query parameters, headers and bodies in request logs.
  pub dev_mode: bool,
  /// Script budget for one invocation. Endpoints may only tighten it.
  #[serde(with = "humantime_serde")]
  pub code_timeout: Duration,
  #[serde(with = "humantime_serde")]
  pub http_timeout: Duration,
  pub remote_endpoints: RemoteEndpointsConfig,
  /// Custom functions callable through `custom_function` endpoints.
  pub functions: HashMap<String, FunctionSpec>,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      dev_mode: false,
      code_timeout: Duration::from_secs(5),
      http_timeout: Duration::from_secs(60),
      remote_endpoints: RemoteEndpointsConfig::default(),
      functions: HashMap::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteEndpointsConfig {
  pub enabled: Vec<RemoteEndpointType>,
}

impl Default for RemoteEndpointsConfig {
  fn default() -> Self {
    Self {
      enabled: RemoteEndpointType::ALL.to_vec(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_defaults() {
    let config: EngineConfig = serde_json::from_value(json!({})).unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.code_timeout, Duration::from_secs(5));
    assert_eq!(config.remote_endpoints.enabled.len(), RemoteEndpointType::ALL.len());
  }

  #[test]
  fn test_humantime_durations() {
    let config: EngineConfig = serde_json::from_value(json!({
      "code_timeout": "250ms",
      "http_timeout": "2m",
      "remote_endpoints": { "enabled": ["http", "mysql"] },
      "functions": { "echo": { "command": ["cat"] } }
    }))
    .unwrap();

    assert_eq!(config.code_timeout, Duration::from_millis(250));
    assert_eq!(config.http_timeout, Duration::from_secs(120));
    assert_eq!(
      config.remote_endpoints.enabled,
      vec![RemoteEndpointType::Http, RemoteEndpointType::MySql]
    );
    assert_eq!(config.functions["echo"].command, vec!["cat".to_string()]);
  }

  #[test]
  fn test_serializes_durations_as_text() {
    let value = serde_json::to_value(EngineConfig::default()).unwrap();
    assert_eq!(value["code_timeout"], json!("5s"));
    assert_eq!(value["http_timeout"], json!("1m"));
  }
}
