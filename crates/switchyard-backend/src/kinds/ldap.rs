//! LDAP directory operations.
//!
//! The bound connection is sticky: the first call against a remote endpoint
//! opens and binds it, later calls in the same invocation reuse it, and the
//! [`ConnectionRegistry`](crate::ConnectionRegistry) unbinds it at the end.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapResult, Mod, Scope, SearchEntry, SearchOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::request::{marshal, to_json};
use crate::{BuildContext, ErrorResponse, Request, RequestError, RequestFactory, Response, StickyConnection, overlay};

const DEFAULT_PORT: u16 = 389;

/// Script-facing shape of a directory call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LdapSpec {
  pub host: String,
  pub port: u16,
  pub username: String,
  pub password: String,
  #[serde(alias = "use_tls")]
  pub use_tls: bool,
  pub operation_name: String,
  pub arguments: Value,
}

impl LdapSpec {
  pub fn url(&self) -> Result<String, RequestError> {
    if self.host.is_empty() {
      return Err(RequestError::validation("ldap config requires a host"));
    }
    let scheme = if self.use_tls { "ldaps" } else { "ldap" };
    let port = if self.port == 0 { DEFAULT_PORT } else { self.port };
    Ok(format!("{scheme}://{}:{port}", self.host))
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attribute {
  #[serde(rename = "type")]
  pub kind: String,
  pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchArguments {
  pub base_distinguished_name: String,
  pub scope: String,
  pub filter: String,
  pub attributes: Vec<String>,
  pub size_limit: i32,
  pub time_limit: i32,
  pub types_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModifyArguments {
  pub distinguished_name: String,
  pub add_attributes: Vec<Attribute>,
  pub delete_attributes: Vec<Attribute>,
  pub replace_attributes: Vec<Attribute>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LdapOperation {
  Search(SearchArguments),
  Add {
    distinguished_name: String,
    attributes: Vec<Attribute>,
  },
  Delete {
    distinguished_name: String,
  },
  Modify(ModifyArguments),
  Compare {
    distinguished_name: String,
    attribute: String,
    value: String,
  },
}

impl LdapOperation {
  pub fn parse(name: &str, arguments: &Value) -> Result<Self, RequestError> {
    let empty = Value::Object(Default::default());
    let arguments = if arguments.is_null() { &empty } else { arguments };
    let field = |key: &str| {
      arguments
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
    };
    let decode = |e: serde_json::Error| RequestError::decode(format!("ldap {name} arguments: {e}"));

    let operation = match name {
      "search" => {
        let mut search: SearchArguments = serde_json::from_value(arguments.clone()).map_err(decode)?;
        scope(&search.scope)?;
        if search.filter.is_empty() {
          search.filter = "(objectClass=*)".to_string();
        }
        Self::Search(search)
      }
      "add" => Self::Add {
        distinguished_name: field("distinguishedName"),
        attributes: serde_json::from_value(arguments.get("attributes").cloned().unwrap_or(Value::Array(Vec::new())))
          .map_err(decode)?,
      },
      "delete" => Self::Delete {
        distinguished_name: field("distinguishedName"),
      },
      "modify" => Self::Modify(serde_json::from_value(arguments.clone()).map_err(decode)?),
      "compare" => Self::Compare {
        distinguished_name: field("distinguishedName"),
        attribute: field("attribute"),
        value: field("value"),
      },
      "" => return Err(RequestError::validation("operationName must not be empty")),
      other => return Err(RequestError::validation(format!("Unsupported LDAP operation {other}"))),
    };

    if !matches!(operation, Self::Search(_)) && operation.distinguished_name().is_empty() {
      return Err(RequestError::validation(format!("ldap {name} requires a distinguishedName")));
    }
    Ok(operation)
  }

  fn distinguished_name(&self) -> &str {
    match self {
      Self::Search(search) => &search.base_distinguished_name,
      Self::Add {
        distinguished_name, ..
      }
      | Self::Delete { distinguished_name }
      | Self::Compare {
        distinguished_name, ..
      } => distinguished_name,
      Self::Modify(modify) => &modify.distinguished_name,
    }
  }
}

fn scope(name: &str) -> Result<Scope, RequestError> {
  match name {
    "" | "sub" | "subtree" => Ok(Scope::Subtree),
    "base" => Ok(Scope::Base),
    "one" | "single" => Ok(Scope::OneLevel),
    other => Err(RequestError::validation(format!("invalid search scope '{other}'"))),
  }
}

fn value_set(values: &[String]) -> HashSet<String> {
  values.iter().cloned().collect()
}

/// Description for the common result codes.
fn describe(code: u32) -> &'static str {
  match code {
    0 => "Success",
    1 => "Operations Error",
    2 => "Protocol Error",
    3 => "Time Limit Exceeded",
    4 => "Size Limit Exceeded",
    5 => "Compare False",
    6 => "Compare True",
    16 => "No Such Attribute",
    20 => "Attribute Or Value Exists",
    21 => "Invalid Attribute Syntax",
    32 => "No Such Object",
    34 => "Invalid DN Syntax",
    49 => "Invalid Credentials",
    50 => "Insufficient Access Rights",
    53 => "Unwilling To Perform",
    65 => "Object Class Violation",
    68 => "Entry Already Exists",
    _ => "Other",
  }
}

#[derive(Debug, Serialize)]
pub struct EntryAttribute {
  pub name: String,
  pub values: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
  pub distinguished_name: String,
  pub attributes: Vec<EntryAttribute>,
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
  pub entries: Vec<Entry>,
}

#[derive(Debug, Serialize)]
pub struct CompareResult {
  pub matches: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LdapResponse {
  pub status_code: u32,
  pub status_description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub search_results: Option<SearchResults>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub compare_result: Option<CompareResult>,
}

impl LdapResponse {
  fn from_result(result: &LdapResult) -> Self {
    let description = if result.text.is_empty() {
      describe(result.rc).to_string()
    } else {
      format!("{}: {}", describe(result.rc), result.text)
    };
    Self {
      status_code: result.rc,
      status_description: description,
      search_results: None,
      compare_result: None,
    }
  }
}

impl Response for LdapResponse {
  fn to_json(&self) -> Value {
    to_json(self)
  }

  fn log(&self) -> String {
    format!("({}) {}", self.status_code, self.status_description)
  }

  fn error(&self) -> Option<&str> {
    None
  }
}

/// A bound directory connection owned by one invocation.
pub struct LdapConnection {
  ldap: Ldap,
}

impl LdapConnection {
  pub async fn open(spec: &LdapSpec) -> Result<Self, RequestError> {
    let url = spec.url()?;
    let (connection, mut ldap) = LdapConnAsync::new(&url)
      .await
      .map_err(|e| RequestError::configuration(format!("unable to connect to {url}: {e}")))?;
    tokio::spawn(async move {
      if let Err(e) = connection.drive().await {
        warn!(error = %e, "ldap_connection_error");
      }
    });

    if !spec.username.is_empty() {
      ldap
        .simple_bind(&spec.username, &spec.password)
        .await
        .and_then(|result| result.success())
        .map_err(|e| RequestError::configuration(format!("unable to bind to {url}: {e}")))?;
    }
    debug!(url = %url, "ldap_connection_opened");
    Ok(Self { ldap })
  }
}

#[async_trait]
impl StickyConnection for LdapConnection {
  async fn close(&mut self) -> Result<(), String> {
    self.ldap.unbind().await.map_err(|e| e.to_string())
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}

pub struct LdapRequest {
  spec: LdapSpec,
  operation: LdapOperation,
  ldap: Ldap,
}

impl LdapRequest {
  async fn run(&self) -> Result<LdapResponse, ldap3::LdapError> {
    let mut ldap = self.ldap.clone();
    match &self.operation {
      LdapOperation::Search(search) => {
        let attributes: Vec<&str> = search.attributes.iter().map(String::as_str).collect();
        let options = SearchOptions::new()
          .sizelimit(search.size_limit)
          .timelimit(search.time_limit)
          .typesonly(search.types_only);
        let result = ldap
          .with_search_options(options)
          .search(
            &search.base_distinguished_name,
            scope(&search.scope).unwrap_or(Scope::Subtree),
            &search.filter,
            attributes,
          )
          .await?;
        let mut response = LdapResponse::from_result(&result.1);
        let entries = result
          .0
          .into_iter()
          .map(|entry| {
            let entry = SearchEntry::construct(entry);
            let mut attributes: Vec<EntryAttribute> = entry
              .attrs
              .into_iter()
              .map(|(name, values)| EntryAttribute { name, values })
              .collect();
            attributes.sort_by(|a, b| a.name.cmp(&b.name));
            Entry {
              distinguished_name: entry.dn,
              attributes,
            }
          })
          .collect();
        response.search_results = Some(SearchResults { entries });
        Ok(response)
      }
      LdapOperation::Add {
        distinguished_name,
        attributes,
      } => {
        let attributes = attributes
          .iter()
          .map(|attribute| (attribute.kind.clone(), value_set(&attribute.values)))
          .collect();
        let result = ldap.add(distinguished_name, attributes).await?;
        Ok(LdapResponse::from_result(&result))
      }
      LdapOperation::Delete { distinguished_name } => {
        let result = ldap.delete(distinguished_name).await?;
        Ok(LdapResponse::from_result(&result))
      }
      LdapOperation::Modify(modify) => {
        let mut mods = Vec::new();
        for attribute in &modify.add_attributes {
          mods.push(Mod::Add(attribute.kind.clone(), value_set(&attribute.values)));
        }
        for attribute in &modify.delete_attributes {
          mods.push(Mod::Delete(attribute.kind.clone(), value_set(&attribute.values)));
        }
        for attribute in &modify.replace_attributes {
          mods.push(Mod::Replace(attribute.kind.clone(), value_set(&attribute.values)));
        }
        let result = ldap.modify(&modify.distinguished_name, mods).await?;
        Ok(LdapResponse::from_result(&result))
      }
      LdapOperation::Compare {
        distinguished_name,
        attribute,
        value,
      } => {
        let result = ldap.compare(distinguished_name, attribute, value).await?;
        let mut response = LdapResponse::from_result(&result.0);
        response.compare_result = Some(CompareResult {
          matches: result.0.rc == 6,
        });
        Ok(response)
      }
    }
  }
}

#[async_trait]
impl Request for LdapRequest {
  async fn perform(&self) -> Box<dyn Response> {
    match self.run().await {
      Ok(response) => Box::new(response),
      Err(e) => ErrorResponse::boxed(format!("ldap {} failed: {e}", self.spec.operation_name)),
    }
  }

  fn log(&self, dev_mode: bool) -> String {
    let mut line = format!(
      "{} {}",
      self.spec.operation_name,
      self.operation.distinguished_name()
    );
    if dev_mode {
      line.push_str(&format!("\nArguments: {}", self.spec.arguments));
    }
    line
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    let mut spec = self.spec.clone();
    spec.password.clear();
    marshal(&spec)
  }
}

pub struct LdapFactory;

#[async_trait]
impl RequestFactory for LdapFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let spec: LdapSpec = overlay::resolve(ctx.remote_endpoint, ctx.payload)?;
    let operation = LdapOperation::parse(&spec.operation_name, &spec.arguments)?;

    let id = ctx.remote_endpoint.id;
    let ldap = match ctx.connections.get::<LdapConnection>(id) {
      Some(connection) => connection.ldap.clone(),
      None => {
        let connection = LdapConnection::open(&spec).await?;
        let ldap = connection.ldap.clone();
        ctx.connections.insert(id, Box::new(connection));
        ldap
      }
    };

    Ok(Arc::new(LdapRequest { spec, operation, ldap }))
  }
}
