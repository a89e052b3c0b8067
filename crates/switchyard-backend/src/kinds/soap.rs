use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::http::HttpClients;
use crate::request::{marshal, to_json};
use crate::{BuildContext, ErrorResponse, Request, RequestError, RequestFactory, Response, overlay};

const ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const WSSE_NS: &str = "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
const PASSWORD_TEXT: &str =
  "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordText";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WssePasswordCredentials {
  pub username: String,
  pub password: String,
}

/// Script-facing shape of a SOAP call.
///
/// Either a complete `envelope` or a `body` fragment is sent; a fragment is
/// wrapped in a SOAP 1.1 envelope, with a WS-Security header when
/// credentials are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoapSpec {
  pub url: String,
  pub service_name: String,
  pub endpoint_name: String,
  pub operation_name: String,
  pub action_name: String,
  pub envelope: String,
  pub body: String,
  pub wsse_password_credentials: Option<WssePasswordCredentials>,
  pub skip_ssl_verification: bool,
}

impl SoapSpec {
  fn envelope(&self, mask_password: bool) -> String {
    if !self.envelope.is_empty() {
      return self.envelope.clone();
    }

    let security = self
      .wsse_password_credentials
      .as_ref()
      .map(|credentials| {
        let password = if mask_password {
          "*".repeat(credentials.password.chars().count())
        } else {
          escape_xml(&credentials.password)
        };
        format!(
          r#"<wsse:Security xmlns:wsse="{WSSE_NS}"><wsse:UsernameToken><wsse:Username>{}</wsse:Username><wsse:Password Type="{PASSWORD_TEXT}">{password}</wsse:Password></wsse:UsernameToken></wsse:Security>"#,
          escape_xml(&credentials.username)
        )
      })
      .unwrap_or_default();

    format!(
      r#"<?xml version="1.0" encoding="UTF-8"?><soapenv:Envelope xmlns:soapenv="{ENVELOPE_NS}"><soapenv:Header>{security}</soapenv:Header><soapenv:Body>{}</soapenv:Body></soapenv:Envelope>"#,
      self.body
    )
  }
}

fn escape_xml(text: &str) -> String {
  let mut escaped = String::with_capacity(text.len());
  for c in text.chars() {
    match c {
      '&' => escaped.push_str("&amp;"),
      '<' => escaped.push_str("&lt;"),
      '>' => escaped.push_str("&gt;"),
      '"' => escaped.push_str("&quot;"),
      '\'' => escaped.push_str("&apos;"),
      _ => escaped.push(c),
    }
  }
  escaped
}

pub struct SoapRequest {
  spec: SoapSpec,
  envelope: String,
  client: Client,
}

impl SoapRequest {
  pub fn new(spec: SoapSpec, client: Client) -> Result<Self, RequestError> {
    if spec.url.is_empty() {
      return Err(RequestError::validation("url must not be empty"));
    }
    url::Url::parse(&spec.url).map_err(|e| RequestError::validation(format!("invalid url '{}': {e}", spec.url)))?;
    if spec.envelope.is_empty() && spec.body.is_empty() {
      return Err(RequestError::validation("either envelope or body must be set"));
    }

    let envelope = spec.envelope(false);
    Ok(Self { spec, envelope, client })
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoapResponse {
  pub status_code: u16,
  pub body: String,
}

impl Response for SoapResponse {
  fn to_json(&self) -> Value {
    to_json(self)
  }

  fn log(&self) -> String {
    format!("({})", self.status_code)
  }

  fn error(&self) -> Option<&str> {
    None
  }
}

#[async_trait]
impl Request for SoapRequest {
  async fn perform(&self) -> Box<dyn Response> {
    let mut request = self
      .client
      .post(&self.spec.url)
      .header(CONTENT_TYPE, "text/xml; charset=utf-8")
      .body(self.envelope.clone());
    if !self.spec.action_name.is_empty() {
      request = request.header("SOAPAction", format!("\"{}\"", self.spec.action_name));
    }

    let response = match request.send().await {
      Ok(response) => response,
      Err(e) => return ErrorResponse::boxed(format!("soap request failed: {e}")),
    };
    let status_code = response.status().as_u16();
    match response.text().await {
      Ok(body) => Box::new(SoapResponse { status_code, body }),
      Err(e) => ErrorResponse::boxed(format!("failed to read soap response: {e}")),
    }
  }

  fn log(&self, dev_mode: bool) -> String {
    let spec = &self.spec;
    let mut line = format!(
      "{}, {}, {}, {}, {}",
      spec.service_name, spec.endpoint_name, spec.operation_name, spec.action_name, spec.url
    );
    if dev_mode {
      line.push_str("\nEnvelope: ");
      line.push_str(&spec.envelope(true));
    }
    line
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    marshal(&self.spec)
  }
}

pub struct SoapFactory {
  clients: HttpClients,
}

impl SoapFactory {
  pub fn new(timeout: Duration) -> Result<Self, RequestError> {
    Ok(Self {
      clients: HttpClients::new(timeout)?,
    })
  }
}

#[async_trait]
impl RequestFactory for SoapFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let spec: SoapSpec = overlay::resolve(ctx.remote_endpoint, ctx.payload)?;
    let client = self.clients.pick(spec.skip_ssl_verification);
    Ok(Arc::new(SoapRequest::new(spec, client)?))
  }
}
