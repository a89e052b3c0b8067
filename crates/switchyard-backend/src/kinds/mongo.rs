use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::Client;
use mongodb::bson::{Bson, Document};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use switchyard_pool::{ConnectionPool, ConnectionSpec, Driver};

use super::{argument, userinfo};
use crate::registry::acquire;
use crate::request::{marshal, to_json};
use crate::{BuildContext, ErrorResponse, Request, RequestError, RequestFactory, Response, overlay};

const DEFAULT_PORT: u16 = 27017;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoHost {
  pub host: String,
  pub port: u16,
}

/// Connection settings. `connectionString` wins over `hosts` and credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MongoConfig {
  pub connection_string: String,
  pub hosts: Vec<MongoHost>,
  pub username: String,
  pub password: String,
  pub database: String,
  pub collection: String,
}

impl MongoConfig {
  pub fn dsn(&self) -> Result<String, RequestError> {
    if !self.connection_string.is_empty() {
      return Ok(self.connection_string.clone());
    }
    if self.hosts.is_empty() {
      return Err(RequestError::validation("mongodb config requires a connectionString or hosts"));
    }

    let hosts = self
      .hosts
      .iter()
      .map(|host| {
        let port = if host.port == 0 { DEFAULT_PORT } else { host.port };
        format!("{}:{port}", host.host)
      })
      .collect::<Vec<_>>()
      .join(",");
    let credentials = if self.username.is_empty() {
      String::new()
    } else {
      userinfo(&self.username, &self.password)?
    };
    Ok(format!("mongodb://{credentials}{hosts}/"))
  }
}

/// Script-facing shape of a document store call.
///
/// `arguments["0"]` names the operation; the following positions carry its
/// filter, documents, update or pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoSpec {
  pub config: MongoConfig,
  pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MongoOperation {
  Find {
    filter: Document,
    limit: Option<i64>,
    skip: Option<u64>,
    sort: Option<Document>,
  },
  Insert(Vec<Document>),
  Update {
    filter: Document,
    update: Document,
  },
  Delete(Document),
  Count(Document),
  Aggregate(Vec<Document>),
}

impl MongoOperation {
  pub fn parse(arguments: &Map<String, Value>) -> Result<Self, RequestError> {
    let operation = argument(arguments, 0)
      .and_then(Value::as_str)
      .ok_or_else(|| RequestError::validation("Missing operation parameter"))?;

    match operation {
      "find" => {
        let options = argument(arguments, 2).and_then(Value::as_object);
        let option = |name: &str| options.and_then(|options| options.get(name));
        Ok(Self::Find {
          filter: document_or_empty(argument(arguments, 1), "filter")?,
          limit: option("limit").and_then(Value::as_i64),
          skip: option("skip").and_then(Value::as_u64),
          sort: option("sort").map(|sort| document(sort, "sort")).transpose()?,
        })
      }
      "insert" => {
        let documents = match argument(arguments, 1) {
          Some(Value::Array(items)) => items
            .iter()
            .map(|item| document(item, "document"))
            .collect::<Result<Vec<_>, _>>()?,
          Some(item) => vec![document(item, "document")?],
          None => return Err(RequestError::validation("insert requires a document")),
        };
        Ok(Self::Insert(documents))
      }
      "update" => Ok(Self::Update {
        filter: document_or_empty(argument(arguments, 1), "filter")?,
        update: argument(arguments, 2)
          .map(|update| document(update, "update"))
          .transpose()?
          .ok_or_else(|| RequestError::validation("update requires an update document"))?,
      }),
      "delete" => Ok(Self::Delete(document_or_empty(argument(arguments, 1), "filter")?)),
      "count" => Ok(Self::Count(document_or_empty(argument(arguments, 1), "filter")?)),
      "aggregate" => match argument(arguments, 1) {
        Some(Value::Array(stages)) => Ok(Self::Aggregate(
          stages
            .iter()
            .map(|stage| document(stage, "pipeline stage"))
            .collect::<Result<Vec<_>, _>>()?,
        )),
        _ => Err(RequestError::validation("pipeline is not an Array")),
      },
      other => Err(RequestError::validation(format!("Invalid operation '{other}'"))),
    }
  }

  fn name(&self) -> &'static str {
    match self {
      Self::Find { .. } => "find",
      Self::Insert(_) => "insert",
      Self::Update { .. } => "update",
      Self::Delete(_) => "delete",
      Self::Count(_) => "count",
      Self::Aggregate(_) => "aggregate",
    }
  }
}

fn document(value: &Value, what: &str) -> Result<Document, RequestError> {
  match Bson::try_from(value.clone()) {
    Ok(Bson::Document(document)) => Ok(document),
    Ok(_) => Err(RequestError::validation(format!("{what} is not an Object"))),
    Err(e) => Err(RequestError::validation(format!("invalid {what}: {e}"))),
  }
}

fn document_or_empty(value: Option<&Value>, what: &str) -> Result<Document, RequestError> {
  match value {
    None | Some(Value::Null) => Ok(Document::new()),
    Some(value) => document(value, what),
  }
}

fn to_extjson(document: Document) -> Value {
  Bson::Document(document).into_relaxed_extjson()
}

pub struct MongoRequest {
  spec: MongoSpec,
  operation: MongoOperation,
  client: Arc<Client>,
}

impl MongoRequest {
  pub fn new(spec: MongoSpec, client: Arc<Client>) -> Result<Self, RequestError> {
    if spec.config.database.is_empty() || spec.config.collection.is_empty() {
      return Err(RequestError::validation("mongodb config requires a database and a collection"));
    }
    let operation = MongoOperation::parse(&spec.arguments)?;
    Ok(Self {
      spec,
      operation,
      client,
    })
  }

  async fn run(&self) -> Result<Value, mongodb::error::Error> {
    let collection = self
      .client
      .database(&self.spec.config.database)
      .collection::<Document>(&self.spec.config.collection);

    match &self.operation {
      MongoOperation::Find {
        filter,
        limit,
        skip,
        sort,
      } => {
        let mut find = collection.find(filter.clone());
        if let Some(limit) = limit {
          find = find.limit(*limit);
        }
        if let Some(skip) = skip {
          find = find.skip(*skip);
        }
        if let Some(sort) = sort {
          find = find.sort(sort.clone());
        }
        let documents: Vec<Document> = find.await?.try_collect().await?;
        Ok(Value::Array(documents.into_iter().map(to_extjson).collect()))
      }
      MongoOperation::Insert(documents) => {
        let result = collection.insert_many(documents.clone()).await?;
        let mut ids: Vec<_> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(Value::Array(
          ids.into_iter().map(|(_, id)| id.into_relaxed_extjson()).collect(),
        ))
      }
      MongoOperation::Update { filter, update } => {
        let result = collection.update_many(filter.clone(), update.clone()).await?;
        Ok(serde_json::json!({
          "matchedCount": result.matched_count,
          "modifiedCount": result.modified_count,
        }))
      }
      MongoOperation::Delete(filter) => {
        let result = collection.delete_many(filter.clone()).await?;
        Ok(serde_json::json!({ "deletedCount": result.deleted_count }))
      }
      MongoOperation::Count(filter) => {
        let count = collection.count_documents(filter.clone()).await?;
        Ok(serde_json::json!({ "count": count }))
      }
      MongoOperation::Aggregate(pipeline) => {
        let documents: Vec<Document> = collection.aggregate(pipeline.clone()).await?.try_collect().await?;
        Ok(Value::Array(documents.into_iter().map(to_extjson).collect()))
      }
    }
  }
}

#[derive(Debug, Serialize)]
pub struct MongoResponse {
  pub data: Value,
}

impl Response for MongoResponse {
  fn to_json(&self) -> Value {
    to_json(self)
  }

  fn log(&self) -> String {
    match &self.data {
      Value::Array(items) => format!("Records found: {}", items.len()),
      other => other.to_string(),
    }
  }

  fn error(&self) -> Option<&str> {
    None
  }
}

#[async_trait]
impl Request for MongoRequest {
  async fn perform(&self) -> Box<dyn Response> {
    match self.run().await {
      Ok(data) => Box::new(MongoResponse { data }),
      Err(e) => ErrorResponse::boxed(format!("mongodb {} failed: {e}", self.operation.name())),
    }
  }

  fn log(&self, dev_mode: bool) -> String {
    let mut line = format!(
      "{} {}.{}",
      self.operation.name(),
      self.spec.config.database,
      self.spec.config.collection
    );
    if dev_mode {
      line.push_str(&format!("\nArguments: {}", Value::Object(self.spec.arguments.clone())));
    }
    line
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    marshal(&self.spec)
  }
}

pub struct MongoFactory {
  pool: Option<Arc<ConnectionPool>>,
}

impl MongoFactory {
  pub fn new(pool: Option<Arc<ConnectionPool>>) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl RequestFactory for MongoFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let spec: MongoSpec = overlay::resolve(ctx.remote_endpoint, ctx.payload)?;
    // Validate before touching the pool so bad scripts fail without a connect.
    MongoOperation::parse(&spec.arguments)?;
    let connection = ConnectionSpec::new(Driver::Mongo, spec.config.dsn()?);
    let client = acquire::<Client>(self.pool.as_deref(), &connection).await?;
    Ok(Arc::new(MongoRequest::new(spec, client)?))
  }
}
