use serde::{Deserialize, Serialize};

use crate::component::Transformation;
use crate::error::ModelError;
use crate::remote_endpoint::RemoteEndpoint;

/// A named backend invocation inside a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
  /// Sandbox identifier; falls back to the remote endpoint's codename.
  #[serde(default)]
  pub endpoint_name_override: String,
  #[serde(default)]
  pub conditional: String,
  #[serde(default = "default_true")]
  pub conditional_positive: bool,
  #[serde(default)]
  pub before: Vec<Transformation>,
  #[serde(default)]
  pub after: Vec<Transformation>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub remote_endpoint: Option<RemoteEndpoint>,
}

impl Call {
  /// The identifier this call's object is bound to in the sandbox.
  pub fn name(&self) -> Result<&str, ModelError> {
    if !self.endpoint_name_override.is_empty() {
      return Ok(&self.endpoint_name_override);
    }
    match &self.remote_endpoint {
      Some(endpoint) if !endpoint.codename.is_empty() => Ok(&endpoint.codename),
      _ => Err(ModelError::UnnamedCall),
    }
  }

  /// The loaded remote endpoint, or an error naming the call.
  pub fn remote_endpoint(&self) -> Result<&RemoteEndpoint, ModelError> {
    self
      .remote_endpoint
      .as_ref()
      .ok_or_else(|| ModelError::RemoteEndpointNotLoaded {
        call: self.name().unwrap_or("<unnamed>").to_string(),
      })
  }
}

pub(crate) fn default_true() -> bool {
  true
}
