//! Built-in document store calls.
//!
//! Arguments are positional:
//!
//! | op | `"1"` | `"2"` | `"3"`… |
//! |---|---|---|---|
//! | `insert` | collection | object or array | |
//! | `select`, `delete` | collection | query string or id | query parameters |
//! | `update` | collection | id | object |

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use switchyard_store::{DocumentStore, StoreError};

use super::argument;
use crate::request::{marshal, non_empty, to_json};
use crate::{BuildContext, Request, RequestError, RequestFactory, Response, overlay};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSpec {
  pub arguments: Map<String, Value>,
}

pub struct StoreRequest {
  spec: StoreSpec,
  account_id: i64,
  store: Arc<dyn DocumentStore>,
}

impl StoreRequest {
  pub fn new(spec: StoreSpec, account_id: i64, store: Arc<dyn DocumentStore>) -> Self {
    Self {
      spec,
      account_id,
      store,
    }
  }

  fn argument(&self, index: usize) -> Option<&Value> {
    argument(&self.spec.arguments, index)
  }

  /// Query parameters: every argument from position 3 on.
  fn parameters(&self) -> Vec<Value> {
    (3..)
      .map_while(|index| self.argument(index).cloned())
      .collect()
  }

  async fn run(&self) -> Result<Vec<Value>, String> {
    let operation = match self.argument(0) {
      None => return Err("Missing operation parameter".to_string()),
      Some(Value::String(operation)) => operation.as_str(),
      Some(_) => return Err("Invalid operation".to_string()),
    };
    let collection = match self.argument(1) {
      Some(Value::String(collection)) => collection.as_str(),
      _ => return Err("collection is not a string".to_string()),
    };
    let account_id = self.account_id;
    let store = &self.store;

    let result = match operation {
      "insert" => {
        let object = self.argument(2).cloned().unwrap_or(Value::Null);
        store.insert(account_id, collection, object).await
      }
      "select" => match self.argument(2) {
        Some(Value::String(query)) => store.select(account_id, collection, query, &self.parameters()).await,
        Some(Value::Number(id)) => match id.as_u64() {
          Some(id) => store.select_by_id(account_id, collection, id).await.map(|doc| vec![doc]),
          None => return Err("id is not a number".to_string()),
        },
        None => store.select(account_id, collection, "", &[]).await,
        Some(_) => return Err("invalid type for query".to_string()),
      },
      "update" => {
        let Some(id) = self.argument(2).and_then(Value::as_u64) else {
          return Err("id is not a number".to_string());
        };
        let object = match self.argument(3) {
          Some(object @ Value::Object(_)) => object.clone(),
          _ => return Err("object is not an Object".to_string()),
        };
        store
          .update_by_id(account_id, collection, id, object)
          .await
          .map(|doc| vec![doc])
      }
      "delete" => match self.argument(2) {
        Some(Value::String(query)) => store.delete(account_id, collection, query, &self.parameters()).await,
        Some(Value::Number(id)) => match id.as_u64() {
          Some(id) => store.delete_by_id(account_id, collection, id).await.map(|doc| vec![doc]),
          None => return Err("id is not a number".to_string()),
        },
        _ => return Err("invalid type for query".to_string()),
      },
      _ => return Err("Invalid operation".to_string()),
    };
    result.map_err(|e: StoreError| e.to_string())
  }
}

#[derive(Debug, Default, Serialize)]
pub struct StoreResponse {
  pub data: Vec<Value>,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub error: String,
}

impl Response for StoreResponse {
  fn to_json(&self) -> Value {
    to_json(self)
  }

  fn log(&self) -> String {
    match self.error() {
      Some(error) => error.to_string(),
      None => format!("Records found: {}", self.data.len()),
    }
  }

  fn error(&self) -> Option<&str> {
    non_empty(&self.error)
  }
}

#[async_trait]
impl Request for StoreRequest {
  async fn perform(&self) -> Box<dyn Response> {
    let response = match self.run().await {
      Ok(data) => StoreResponse {
        data,
        error: String::new(),
      },
      Err(error) => StoreResponse {
        data: Vec::new(),
        error,
      },
    };
    Box::new(response)
  }

  fn log(&self, dev_mode: bool) -> String {
    let mut line = format!("Arguments: {}", Value::Object(self.spec.arguments.clone()));
    if dev_mode {
      line.push_str(&format!("\nAccountID: {}", self.account_id));
    }
    line
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    marshal(&self.spec)
  }
}

pub struct StoreFactory {
  store: Option<Arc<dyn DocumentStore>>,
}

impl StoreFactory {
  pub fn new(store: Option<Arc<dyn DocumentStore>>) -> Self {
    Self { store }
  }
}

#[async_trait]
impl RequestFactory for StoreFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let store = self
      .store
      .clone()
      .ok_or_else(|| RequestError::configuration("no document store is set up"))?;
    let spec: StoreSpec = overlay::resolve(ctx.remote_endpoint, ctx.payload)?;
    Ok(Arc::new(StoreRequest::new(spec, ctx.remote_endpoint.account_id, store)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use switchyard_store::{ID_FIELD, MemoryStore};

  fn request(store: &Arc<dyn DocumentStore>, arguments: Value) -> StoreRequest {
    StoreRequest::new(
      StoreSpec {
        arguments: arguments.as_object().cloned().unwrap(),
      },
      1,
      Arc::clone(store),
    )
  }

  async fn perform(store: &Arc<dyn DocumentStore>, arguments: Value) -> Value {
    request(store, arguments).perform().await.to_json()
  }

  #[test]
  fn test_log_starts_with_arguments() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let call = request(&store, json!({ "0": "select", "1": "people" }));
    assert_eq!(call.log(false), r#"Arguments: {"0":"select","1":"people"}"#);
    assert_eq!(call.log(true), "Arguments: {\"0\":\"select\",\"1\":\"people\"}\nAccountID: 1");
  }

  #[tokio::test]
  async fn test_insert_select_update_delete() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());

    let inserted = perform(&store, json!({ "0": "insert", "1": "people", "2": [{ "age": 30 }, { "age": 40 }] })).await;
    assert_eq!(inserted["data"].as_array().unwrap().len(), 2);
    let id = inserted["data"][0][ID_FIELD].as_u64().unwrap();

    let selected = perform(&store, json!({ "0": "select", "1": "people", "2": "age > $1", "3": 35 })).await;
    assert_eq!(selected["data"], json!([{ "age": 40, "$id": id + 1 }]));

    let by_id = perform(&store, json!({ "0": "select", "1": "people", "2": id })).await;
    assert_eq!(by_id["data"][0]["age"], json!(30));

    let updated = perform(&store, json!({ "0": "update", "1": "people", "2": id, "3": { "age": 31 } })).await;
    assert_eq!(updated["data"][0]["age"], json!(31));

    let deleted = perform(&store, json!({ "0": "delete", "1": "people", "2": "age >= 31" })).await;
    assert_eq!(deleted["data"].as_array().unwrap().len(), 2);
    assert!(deleted.get("error").is_none());
  }

  #[tokio::test]
  async fn test_argument_errors_are_response_data() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());

    let cases = [
      (json!({}), "Missing operation parameter"),
      (json!({ "0": "truncate", "1": "people" }), "Invalid operation"),
      (json!({ "0": "select", "1": 4 }), "collection is not a string"),
      (json!({ "0": "select", "1": "people", "2": true }), "invalid type for query"),
      (json!({ "0": "update", "1": "people", "2": "x" }), "id is not a number"),
      (json!({ "0": "update", "1": "people", "2": 1, "3": [1] }), "object is not an Object"),
    ];
    for (arguments, expected) in cases {
      let response = request(&store, arguments).perform().await;
      assert_eq!(response.error(), Some(expected));
      assert_eq!(response.log(), expected);
    }
  }

  #[tokio::test]
  async fn test_store_errors_are_response_data() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let response = request(&store, json!({ "0": "select", "1": "missing", "2": "true" }))
      .perform()
      .await;
    assert!(response.error().unwrap().contains("missing"));
    assert_eq!(response.to_json()["data"], json!([]));
  }
}
