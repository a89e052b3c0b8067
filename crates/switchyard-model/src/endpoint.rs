use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::component::Component;

/// One gateway-exposed operation and its execution steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
  pub id: i64,
  #[serde(default)]
  pub name: String,
  /// Environment data exposed to scripts as the `env` global.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub environment: Option<serde_json::Value>,
  #[serde(default)]
  pub components: Vec<Component>,
  /// Script execution budget for this endpoint. Capped by the engine-wide
  /// budget.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub code_timeout_ms: Option<u64>,
}

impl ProxyEndpoint {
  /// Effective script budget given the engine-wide ceiling.
  pub fn code_timeout(&self, ceiling: Duration) -> Duration {
    match self.code_timeout_ms {
      Some(ms) if ms > 0 => ceiling.min(Duration::from_millis(ms)),
      _ => ceiling,
    }
  }
}
