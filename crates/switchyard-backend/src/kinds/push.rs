use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::request::{marshal, non_empty, to_json};
use crate::{BuildContext, Request, RequestError, RequestFactory, Response, overlay};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PushConfig {
  pub gateway_url: String,
  pub api_key: String,
}

/// Script-facing shape of a push notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushSpec {
  pub config: PushConfig,
  pub channel: String,
  pub payload: Value,
}

pub struct PushRequest {
  spec: PushSpec,
  client: Client,
}

impl PushRequest {
  pub fn new(spec: PushSpec, client: Client) -> Result<Self, RequestError> {
    if spec.channel.is_empty() {
      return Err(RequestError::validation("channel must not be empty"));
    }
    if !(spec.payload.is_object() || spec.payload.is_null()) {
      return Err(RequestError::validation("payload is not an Object"));
    }
    url::Url::parse(&spec.config.gateway_url).map_err(|e| {
      RequestError::validation(format!("invalid push gateway url '{}': {e}", spec.config.gateway_url))
    })?;
    Ok(Self { spec, client })
  }

  async fn send(&self) -> Result<(), String> {
    let mut request = self.client.post(&self.spec.config.gateway_url).json(&json!({
      "channel": self.spec.channel,
      "payload": self.spec.payload,
    }));
    if !self.spec.config.api_key.is_empty() {
      request = request.bearer_auth(&self.spec.config.api_key);
    }

    let response = request.send().await.map_err(|e| format!("push failed: {e}"))?;
    let status = response.status();
    if status.is_success() {
      Ok(())
    } else {
      Err(format!("push gateway returned {status}"))
    }
  }
}

#[derive(Debug, Default, Serialize)]
pub struct PushResponse {
  pub error: String,
}

impl Response for PushResponse {
  fn to_json(&self) -> Value {
    to_json(self)
  }

  fn log(&self) -> String {
    match self.error() {
      Some(error) => error.to_string(),
      None => "Pushed".to_string(),
    }
  }

  fn error(&self) -> Option<&str> {
    non_empty(&self.error)
  }
}

#[async_trait]
impl Request for PushRequest {
  async fn perform(&self) -> Box<dyn Response> {
    Box::new(PushResponse {
      error: self.send().await.err().unwrap_or_default(),
    })
  }

  fn log(&self, _dev_mode: bool) -> String {
    format!("{} {}", self.spec.channel, self.spec.payload)
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    let mut spec = self.spec.clone();
    spec.config.api_key.clear();
    marshal(&spec)
  }
}

pub struct PushFactory {
  client: Client,
}

impl PushFactory {
  pub fn new(timeout: Duration) -> Result<Self, RequestError> {
    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| RequestError::configuration(format!("failed to build http client: {e}")))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl RequestFactory for PushFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let spec: PushSpec = overlay::resolve(ctx.remote_endpoint, ctx.payload)?;
    Ok(Arc::new(PushRequest::new(spec, self.client.clone())?))
  }
}
