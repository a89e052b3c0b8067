use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use switchyard_model::{RemoteEndpoint, RemoteEndpointType};
use tracing::debug;

use crate::{BuildContext, ConnectionRegistry, Request, RequestError, RequestRegistry};

/// Payload field a script may set to pin the kind it expects.
pub const TYPE_TAG: &str = "__type";

/// Turns script payloads into concrete requests.
pub struct RequestBuilder {
  registry: RequestRegistry,
  enabled: HashSet<RemoteEndpointType>,
}

impl RequestBuilder {
  pub fn new(registry: RequestRegistry, enabled: impl IntoIterator<Item = RemoteEndpointType>) -> Self {
    Self {
      registry,
      enabled: enabled.into_iter().collect(),
    }
  }

  pub fn is_enabled(&self, kind: RemoteEndpointType) -> bool {
    self.enabled.contains(&kind)
  }

  /// Build the request `payload` describes for `remote_endpoint`.
  pub async fn prepare_request(
    &self,
    remote_endpoint: &RemoteEndpoint,
    payload: &Value,
    connections: &mut ConnectionRegistry,
  ) -> Result<Arc<dyn Request>, RequestError> {
    let kind = remote_endpoint.endpoint_type;
    if !self.is_enabled(kind) {
      return Err(RequestError::configuration(format!(
        "remote endpoint type {kind} is not enabled"
      )));
    }

    if let Some(tag) = payload.get(TYPE_TAG) {
      if tag.as_str() != Some(kind.as_str()) {
        return Err(RequestError::validation(format!(
          "mismatched request types: expected {kind} got {tag}"
        )));
      }
    }

    let factory = self
      .registry
      .get(kind)
      .ok_or_else(|| RequestError::configuration(format!("{kind} is not a supported endpoint type")))?;

    debug!(remote_endpoint_id = remote_endpoint.id, kind = %kind, "request_prepare");
    factory
      .build(BuildContext {
        remote_endpoint,
        payload,
        connections,
      })
      .await
  }
}
