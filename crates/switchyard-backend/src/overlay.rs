//! Three-tier configuration overlay.
//!
//! ```text
//! payload (script)  ─┐
//! remote data       ─┼─▶ merge of non-zero fields ─▶ typed request
//! environment data  ─┘        (later layers win)
//! ```

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use switchyard_model::RemoteEndpoint;

use crate::RequestError;

/// Merge the payload with the endpoint's base and environment data, then
/// decode the result as `T`.
pub fn resolve<T: DeserializeOwned>(remote_endpoint: &RemoteEndpoint, payload: &Value) -> Result<T, RequestError> {
  let merged = merge(
    payload,
    &remote_endpoint.data,
    remote_endpoint.selected_environment_data.as_ref(),
  )?;
  serde_json::from_value(Value::Object(merged)).map_err(|e| {
    RequestError::decode(format!(
      "{} request for '{}': {e}",
      remote_endpoint.endpoint_type, remote_endpoint.codename
    ))
  })
}

/// Overlay `base` and then `environment` onto `payload`. Only non-zero fields
/// of each layer are copied. Object fields such as headers or query merge key
/// by key; anything deeper is replaced whole.
pub fn merge(payload: &Value, base: &Value, environment: Option<&Value>) -> Result<Map<String, Value>, RequestError> {
  let mut merged = Map::new();
  for (layer, label) in [
    (Some(payload), "payload"),
    (Some(base), "remote endpoint data"),
    (environment, "environment data"),
  ] {
    let Some(layer) = layer else { continue };
    let Some(fields) = as_object(layer, label)? else {
      continue;
    };
    for (key, value) in fields {
      if !is_present(value) {
        continue;
      }
      match (merged.get_mut(key), value) {
        (Some(Value::Object(current)), Value::Object(inner)) => {
          for (inner_key, inner_value) in inner {
            if is_present(inner_value) {
              current.insert(inner_key.clone(), inner_value.clone());
            }
          }
        }
        _ => {
          merged.insert(key.clone(), value.clone());
        }
      }
    }
  }
  Ok(merged)
}

fn as_object<'a>(value: &'a Value, label: &str) -> Result<Option<&'a Map<String, Value>>, RequestError> {
  match value {
    Value::Null => Ok(None),
    Value::Object(fields) => Ok(Some(fields)),
    other => Err(RequestError::decode(format!(
      "{label} must be a JSON object, got {}",
      kind_of(other)
    ))),
  }
}

/// Whether a value counts as set for overlay purposes.
pub fn is_present(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(flag) => *flag,
    Value::Number(number) => number.as_f64() != Some(0.0),
    Value::String(text) => !text.is_empty(),
    Value::Array(items) => !items.is_empty(),
    Value::Object(fields) => !fields.is_empty(),
  }
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::Deserialize;
  use serde_json::json;
  use switchyard_model::RemoteEndpointType;

  #[derive(Debug, Deserialize)]
  struct Target {
    #[serde(default)]
    method: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    retries: u32,
  }

  fn endpoint(data: Value, environment: Option<Value>) -> RemoteEndpoint {
    RemoteEndpoint {
      id: 1,
      account_id: 1,
      api_id: 1,
      name: "billing".to_string(),
      codename: "billing".to_string(),
      endpoint_type: RemoteEndpointType::Http,
      data,
      selected_environment_data: environment,
    }
  }

  #[test]
  fn test_environment_wins_over_base_and_payload() {
    let remote = endpoint(json!({ "method": "GET" }), Some(json!({ "method": "POST" })));
    let target: Target = resolve(&remote, &json!({ "method": "" })).unwrap();
    assert_eq!(target.method, "POST");
  }

  #[test]
  fn test_zero_override_keeps_base() {
    let remote = endpoint(
      json!({ "url": "http://base", "retries": 3 }),
      Some(json!({ "url": "", "retries": 0 })),
    );
    let target: Target = resolve(&remote, &json!({ "url": "http://payload" })).unwrap();
    assert_eq!(target.url, "http://base");
    assert_eq!(target.retries, 3);
  }

  #[test]
  fn test_payload_survives_absent_layers() {
    let remote = endpoint(json!({}), None);
    let target: Target = resolve(&remote, &json!({ "url": "http://payload" })).unwrap();
    assert_eq!(target.url, "http://payload");
    assert_eq!(target.method, "");
  }

  #[test]
  fn test_merge_combines_nested_objects() {
    let merged = merge(
      &json!({ "headers": { "Authorization": "Bearer t", "Accept": "text/plain" } }),
      &json!({ "headers": { "Accept": "application/json", "X-Empty": "" } }),
      Some(&json!({ "headers": { "X-Env": "staging" } })),
    )
    .unwrap();
    assert_eq!(
      merged["headers"],
      json!({ "Authorization": "Bearer t", "Accept": "application/json", "X-Env": "staging" })
    );
  }

  #[test]
  fn test_merge_replaces_below_first_level() {
    let merged = merge(
      &json!({ "config": { "env": { "A": "1" } }, "query": { "page": "2" } }),
      &json!({ "config": { "env": { "B": "2" } }, "query": "raw" }),
      None,
    )
    .unwrap();
    assert_eq!(merged["config"], json!({ "env": { "B": "2" } }));
    assert_eq!(merged["query"], json!("raw"));
  }

  #[test]
  fn test_non_object_layers_are_rejected() {
    let remote = endpoint(json!([1, 2]), None);
    assert!(matches!(
      resolve::<Target>(&remote, &json!({})),
      Err(RequestError::Decode { .. })
    ));

    let remote = endpoint(json!({}), None);
    assert!(resolve::<Target>(&remote, &json!("GET")).is_err());
  }

  #[test]
  fn test_wrong_field_type_is_decode_error() {
    let remote = endpoint(json!({ "retries": "many" }), None);
    assert!(matches!(
      resolve::<Target>(&remote, &json!({})),
      Err(RequestError::Decode { .. })
    ));
  }
}
