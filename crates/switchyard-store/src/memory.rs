use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::{DocumentStore, ID_FIELD, Query, StoreError};

type CollectionKey = (i64, String);

/// In-memory [`DocumentStore`].
///
/// Ids are unique across all collections and never reused.
#[derive(Debug)]
pub struct MemoryStore {
  collections: DashMap<CollectionKey, BTreeMap<u64, Map<String, Value>>>,
  next_id: AtomicU64,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self {
      collections: DashMap::new(),
      next_id: AtomicU64::new(1),
    }
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn key(account_id: i64, collection: &str) -> CollectionKey {
    (account_id, collection.to_string())
  }
}

fn with_id(mut object: Map<String, Value>, id: u64) -> Value {
  object.insert(ID_FIELD.to_string(), Value::from(id));
  Value::Object(object)
}

fn into_object(value: Value) -> Result<Map<String, Value>, StoreError> {
  match value {
    Value::Object(mut object) => {
      object.remove(ID_FIELD);
      Ok(object)
    }
    _ => Err(StoreError::invalid_document("object is not an Object")),
  }
}

#[async_trait]
impl DocumentStore for MemoryStore {
  async fn insert(&self, account_id: i64, collection: &str, object: Value) -> Result<Vec<Value>, StoreError> {
    let objects = match object {
      Value::Array(items) => items
        .into_iter()
        .map(into_object)
        .collect::<Result<Vec<_>, _>>()?,
      Value::Object(_) => vec![into_object(object)?],
      _ => return Err(StoreError::invalid_document("object is not an Object or Array")),
    };

    let mut documents = self.collections.entry(Self::key(account_id, collection)).or_default();
    let mut stored = Vec::with_capacity(objects.len());
    for object in objects {
      let id = self.next_id.fetch_add(1, Ordering::Relaxed);
      documents.insert(id, object.clone());
      stored.push(with_id(object, id));
    }
    Ok(stored)
  }

  async fn select(
    &self,
    account_id: i64,
    collection: &str,
    query: &str,
    params: &[Value],
  ) -> Result<Vec<Value>, StoreError> {
    let query = Query::compile(query, params)?;
    let documents = self
      .collections
      .get(&Self::key(account_id, collection))
      .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

    Ok(query.apply(
      documents
        .iter()
        .map(|(id, object)| with_id(object.clone(), *id)),
    ))
  }

  async fn select_by_id(&self, account_id: i64, collection: &str, id: u64) -> Result<Value, StoreError> {
    self
      .collections
      .get(&Self::key(account_id, collection))
      .and_then(|documents| documents.get(&id).cloned())
      .map(|object| with_id(object, id))
      .ok_or_else(|| StoreError::NotFound {
        collection: collection.to_string(),
        id,
      })
  }

  async fn update_by_id(
    &self,
    account_id: i64,
    collection: &str,
    id: u64,
    object: Value,
  ) -> Result<Value, StoreError> {
    let object = into_object(object)?;
    let not_found = || StoreError::NotFound {
      collection: collection.to_string(),
      id,
    };

    let mut documents = self
      .collections
      .get_mut(&Self::key(account_id, collection))
      .ok_or_else(not_found)?;
    let slot = documents.get_mut(&id).ok_or_else(not_found)?;
    *slot = object.clone();
    Ok(with_id(object, id))
  }

  async fn delete(
    &self,
    account_id: i64,
    collection: &str,
    query: &str,
    params: &[Value],
  ) -> Result<Vec<Value>, StoreError> {
    let query = Query::compile(query, params)?;
    let Some(mut documents) = self.collections.get_mut(&Self::key(account_id, collection)) else {
      return Ok(Vec::new());
    };

    let removed = query.apply(
      documents
        .iter()
        .map(|(id, object)| with_id(object.clone(), *id)),
    );
    for document in &removed {
      if let Some(id) = document.get(ID_FIELD).and_then(Value::as_u64) {
        documents.remove(&id);
      }
    }
    Ok(removed)
  }

  async fn delete_by_id(&self, account_id: i64, collection: &str, id: u64) -> Result<Value, StoreError> {
    self
      .collections
      .get_mut(&Self::key(account_id, collection))
      .and_then(|mut documents| documents.remove(&id))
      .map(|object| with_id(object, id))
      .ok_or_else(|| StoreError::NotFound {
        collection: collection.to_string(),
        id,
      })
  }
}
