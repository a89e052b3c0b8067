use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::request::{marshal, to_json};
use crate::{BuildContext, ErrorResponse, Request, RequestError, RequestFactory, Response, overlay};

/// Script-facing shape of an HTTP call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpSpec {
  pub method: String,
  pub url: String,
  /// Sent as-is when a string, JSON-encoded otherwise.
  pub body: Value,
  /// Each value is a string or an array of strings.
  pub headers: Map<String, Value>,
  pub query: BTreeMap<String, Value>,
  pub skip_ssl_verification: bool,
}

pub struct HttpRequest {
  spec: HttpSpec,
  method: Method,
  url: String,
  headers: HeaderMap,
  body: Option<String>,
  client: Client,
}

impl HttpRequest {
  pub fn new(spec: HttpSpec, client: Client) -> Result<Self, RequestError> {
    if spec.url.is_empty() {
      return Err(RequestError::validation("url must not be empty"));
    }
    url::Url::parse(&spec.url).map_err(|e| RequestError::validation(format!("invalid url '{}': {e}", spec.url)))?;

    let method = if spec.method.is_empty() {
      Method::GET
    } else {
      Method::from_bytes(spec.method.to_uppercase().as_bytes())
        .map_err(|_| RequestError::validation(format!("unsupported HTTP method: {}", spec.method)))?
    };

    let headers = header_map(&spec.headers)?;
    let body = match &spec.body {
      Value::Null => None,
      Value::String(text) => Some(text.clone()),
      other => Some(other.to_string()),
    };
    let url = complete_url(&spec.url, &spec.query);

    Ok(Self {
      spec,
      method,
      url,
      headers,
      body,
      client,
    })
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }
}

/// Append `query` to `url`, joining with `?` or `&` as needed.
pub fn complete_url(url: &str, query: &BTreeMap<String, Value>) -> String {
  if query.is_empty() {
    return url.to_string();
  }

  let encoded = url::form_urlencoded::Serializer::new(String::new())
    .extend_pairs(query.iter().map(|(key, value)| (key, text_of(value))))
    .finish();
  let separator = if url.contains('?') { '&' } else { '?' };
  format!("{url}{separator}{encoded}")
}

fn text_of(value: &Value) -> String {
  match value {
    Value::String(text) => text.clone(),
    other => other.to_string(),
  }
}

fn header_map(headers: &Map<String, Value>) -> Result<HeaderMap, RequestError> {
  let mut map = HeaderMap::new();
  for (name, value) in headers {
    let header = HeaderName::from_bytes(name.as_bytes())
      .map_err(|_| RequestError::validation(format!("invalid header name '{name}'")))?;
    let values = match value {
      Value::Array(items) => items.iter().map(text_of).collect(),
      other => vec![text_of(other)],
    };
    for value in values {
      let value = HeaderValue::from_str(&value)
        .map_err(|_| RequestError::validation(format!("invalid value for header '{name}'")))?;
      map.append(header.clone(), value);
    }
  }
  Ok(map)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
  pub status_code: u16,
  pub body: String,
  /// Single-valued headers map to a string, repeated ones to an array.
  pub headers: Map<String, Value>,
}

impl HttpResponse {
  pub(crate) async fn read(response: reqwest::Response) -> Result<Self, reqwest::Error> {
    let status_code = response.status().as_u16();
    let mut headers = Map::new();
    for name in response.headers().keys() {
      let mut values: Vec<Value> = response
        .headers()
        .get_all(name)
        .iter()
        .map(|value| Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()))
        .collect();
      let value = if values.len() == 1 {
        values.remove(0)
      } else {
        Value::Array(values)
      };
      headers.insert(name.as_str().to_string(), value);
    }
    let body = response.text().await?;

    Ok(Self {
      status_code,
      body,
      headers,
    })
  }
}

impl Response for HttpResponse {
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
impl Request for HttpRequest {
  async fn perform(&self) -> Box<dyn Response> {
    let mut request = self
      .client
      .request(self.method.clone(), &self.url)
      .headers(self.headers.clone());
    if let Some(body) = &self.body {
      request = request.body(body.clone());
    }

    let response = match request.send().await {
      Ok(response) => response,
      Err(e) => return ErrorResponse::boxed(format!("http request failed: {e}")),
    };
    match HttpResponse::read(response).await {
      Ok(response) => Box::new(response),
      Err(e) => ErrorResponse::boxed(format!("failed to read http response: {e}")),
    }
  }

  fn log(&self, dev_mode: bool) -> String {
    let mut line = format!("{} {}", self.method, self.spec.url);
    if dev_mode {
      line.push_str(&format!(
        "\nQuery Parameters: {}\nHeaders: {}\nBody: {}",
        serde_json::to_string(&self.spec.query).unwrap_or_default(),
        Value::Object(self.spec.headers.clone()),
        self.body.as_deref().unwrap_or_default(),
      ));
    }
    line
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    marshal(&self.spec)
  }
}

/// Secure and certificate-skipping clients sharing one timeout.
#[derive(Clone)]
pub(crate) struct HttpClients {
  secure: Client,
  insecure: Client,
}

impl HttpClients {
  pub(crate) fn new(timeout: Duration) -> Result<Self, RequestError> {
    let build = |insecure: bool| {
      Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(insecure)
        .build()
        .map_err(|e| RequestError::configuration(format!("failed to build http client: {e}")))
    };
    Ok(Self {
      secure: build(false)?,
      insecure: build(true)?,
    })
  }

  pub(crate) fn pick(&self, skip_ssl_verification: bool) -> Client {
    if skip_ssl_verification {
      self.insecure.clone()
    } else {
      self.secure.clone()
    }
  }
}

pub struct HttpFactory {
  clients: HttpClients,
}

impl HttpFactory {
  pub fn new(timeout: Duration) -> Result<Self, RequestError> {
    Ok(Self {
      clients: HttpClients::new(timeout)?,
    })
  }
}

#[async_trait]
impl RequestFactory for HttpFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let spec: HttpSpec = overlay::resolve(ctx.remote_endpoint, ctx.payload)?;
    let client = self.clients.pick(spec.skip_ssl_verification);
    Ok(Arc::new(HttpRequest::new(spec, client)?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn spec(value: Value) -> HttpSpec {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_complete_url_joins_query() {
    let query: BTreeMap<String, Value> = [
      ("q".to_string(), json!("a b")),
      ("page".to_string(), json!(2)),
    ]
    .into();

    assert_eq!(complete_url("http://x/search", &query), "http://x/search?page=2&q=a+b");
    assert_eq!(
      complete_url("http://x/search?lang=en", &query),
      "http://x/search?lang=en&page=2&q=a+b"
    );
    assert_eq!(complete_url("http://x/", &BTreeMap::new()), "http://x/");
  }

  #[test]
  fn test_validation() {
    assert!(matches!(
      HttpRequest::new(spec(json!({})), Client::new()),
      Err(RequestError::Validation { .. })
    ));
    assert!(matches!(
      HttpRequest::new(spec(json!({ "url": "not a url" })), Client::new()),
      Err(RequestError::Validation { .. })
    ));
    assert!(HttpRequest::new(spec(json!({ "url": "http://x", "method": "GE T" })), Client::new()).is_err());
  }

  #[test]
  fn test_method_defaults_to_get_and_is_uppercased() {
    let request = HttpRequest::new(spec(json!({ "url": "http://x" })), Client::new()).unwrap();
    assert_eq!(*request.method(), Method::GET);

    let request = HttpRequest::new(spec(json!({ "url": "http://x", "method": "post" })), Client::new()).unwrap();
    assert_eq!(*request.method(), Method::POST);
  }

  #[test]
  fn test_log_hides_details_outside_dev_mode() {
    let request = HttpRequest::new(
      spec(json!({
        "url": "http://x/users",
        "method": "PUT",
        "headers": { "X-Trace": ["a", "b"] },
        "body": { "name": "ada" }
      })),
      Client::new(),
    )
    .unwrap();

    assert_eq!(request.log(false), "PUT http://x/users");
    let verbose = request.log(true);
    assert!(verbose.contains("X-Trace"));
    assert!(verbose.contains(r#"{"name":"ada"}"#));
  }

  #[tokio::test]
  async fn test_connection_failure_is_response_data() {
    let request = HttpRequest::new(spec(json!({ "url": "http://127.0.0.1:9/" })), Client::new()).unwrap();
    let response = request.perform().await;
    assert!(response.error().is_some());
    assert!(response.to_json()["error"].as_str().unwrap().contains("http request failed"));
  }
}
