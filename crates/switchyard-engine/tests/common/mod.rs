#![allow(dead_code)]

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use switchyard_backend::{
  BuildContext, Request, RequestError, RequestFactory, RequestRegistry, Response, StickyConnection,
};
use switchyard_model::{Component, RemoteEndpointType};
use switchyard_sandbox::{Sandbox, SandboxError};

/// Sandbox double that records every step the engine takes.
#[derive(Default)]
pub struct Recording {
  pub steps: Vec<String>,
  pub truthy: HashSet<String>,
  pub payloads: HashMap<String, Value>,
  pub inserted: Vec<(Vec<String>, Vec<Value>)>,
  pub globals: HashMap<String, Value>,
}

impl Recording {
  pub fn truthy(exprs: &[&str]) -> Self {
    Self {
      truthy: exprs.iter().map(|e| e.to_string()).collect(),
      ..Self::default()
    }
  }
}

impl Sandbox for Recording {
  fn run(&mut self, script: &str) -> Result<Value, SandboxError> {
    match script {
      "timeout" => Err(SandboxError::Timeout),
      "fail" => Err(SandboxError::script("boom")),
      _ => {
        self.steps.push(format!("run:{script}"));
        Ok(Value::Null)
      }
    }
  }

  fn evaluate_condition(&mut self, expr: &str) -> Result<bool, SandboxError> {
    self.steps.push(format!("cond:{expr}"));
    Ok(self.truthy.contains(expr))
  }

  fn run_with_stop(&mut self, script: &str) -> Result<(Value, bool), SandboxError> {
    self.run(script)?;
    Ok((Value::Null, script == "stop"))
  }

  fn get(&mut self, name: &str) -> Result<Value, SandboxError> {
    Ok(self.globals.get(name).cloned().unwrap_or(Value::Null))
  }

  fn set(&mut self, name: &str, value: &Value) -> Result<(), SandboxError> {
    self.globals.insert(name.to_string(), value.clone());
    Ok(())
  }

  fn declare_calls(&mut self, names: &[String]) -> Result<(), SandboxError> {
    self.steps.push(format!("declare:{}", names.join(",")));
    Ok(())
  }

  fn prepare_raw_requests(&mut self, names: &[String]) -> Result<Vec<Value>, SandboxError> {
    Ok(
      names
        .iter()
        .map(|name| self.payloads.get(name).cloned().unwrap_or_else(|| json!({})))
        .collect(),
    )
  }

  fn insert_responses(&mut self, names: &[String], responses: &[Value]) -> Result<(), SandboxError> {
    self.steps.push(format!("insert:{}", names.join(",")));
    self.inserted.push((names.to_vec(), responses.to_vec()));
    Ok(())
  }
}

/// Sleeps for `delay_ms` from the endpoint data, then answers with its
/// codename and the payload it was built from.
pub struct SleepRequest {
  name: String,
  delay: Duration,
  fail: bool,
  payload: Value,
}

pub struct SleepResponse {
  name: String,
  payload: Value,
  error: Option<String>,
}

impl Response for SleepResponse {
  fn to_json(&self) -> Value {
    match &self.error {
      Some(error) => json!({ "error": error }),
      None => json!({ "data": { "name": self.name, "payload": self.payload } }),
    }
  }

  fn log(&self) -> String {
    self.name.clone()
  }

  fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }
}

#[async_trait]
impl Request for SleepRequest {
  async fn perform(&self) -> Box<dyn Response> {
    tokio::time::sleep(self.delay).await;
    Box::new(SleepResponse {
      name: self.name.clone(),
      payload: self.payload.clone(),
      error: self.fail.then(|| format!("{} failed", self.name)),
    })
  }

  fn log(&self, _dev_mode: bool) -> String {
    format!("sleep {}", self.name)
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    serde_json::to_vec(&self.payload).map_err(|e| RequestError::decode(e.to_string()))
  }
}

fn sleep_request(ctx: &BuildContext<'_>) -> Arc<dyn Request> {
  let data = &ctx.remote_endpoint.data;
  Arc::new(SleepRequest {
    name: ctx.remote_endpoint.codename.clone(),
    delay: Duration::from_millis(data["delay_ms"].as_u64().unwrap_or(0)),
    fail: data["fail"].as_bool().unwrap_or(false),
    payload: ctx.payload.clone(),
  })
}

pub struct SleepFactory;

#[async_trait]
impl RequestFactory for SleepFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    Ok(sleep_request(&ctx))
  }
}

/// Counts how often it is closed; fails the close when `fail_close` is set.
pub struct Counting {
  closed: Arc<AtomicUsize>,
  fail_close: bool,
}

#[async_trait]
impl StickyConnection for Counting {
  async fn close(&mut self) -> Result<(), String> {
    self.closed.fetch_add(1, Ordering::SeqCst);
    if self.fail_close {
      Err("connection reset".to_string())
    } else {
      Ok(())
    }
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}

/// Opens one [`Counting`] connection per remote endpoint id.
pub struct StickyFactory {
  pub closed: Arc<AtomicUsize>,
  pub opened: Arc<AtomicUsize>,
  pub fail_close: bool,
}

#[async_trait]
impl RequestFactory for StickyFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let id = ctx.remote_endpoint.id;
    if ctx.connections.get::<Counting>(id).is_none() {
      self.opened.fetch_add(1, Ordering::SeqCst);
      ctx.connections.insert(
        id,
        Box::new(Counting {
          closed: Arc::clone(&self.closed),
          fail_close: self.fail_close,
        }),
      );
    }
    Ok(sleep_request(&ctx))
  }
}

pub struct Sticky {
  pub closed: Arc<AtomicUsize>,
  pub opened: Arc<AtomicUsize>,
}

/// Registry with sleep factories for `http` and `postgres` and a sticky
/// factory for `ldap`.
pub fn registry(fail_close: bool) -> (RequestRegistry, Sticky) {
  let closed = Arc::new(AtomicUsize::new(0));
  let opened = Arc::new(AtomicUsize::new(0));
  let mut registry = RequestRegistry::new();
  registry
    .register(RemoteEndpointType::Http, SleepFactory)
    .register(RemoteEndpointType::Postgres, SleepFactory)
    .register(
      RemoteEndpointType::Ldap,
      StickyFactory {
        closed: Arc::clone(&closed),
        opened: Arc::clone(&opened),
        fail_close,
      },
    );
  (registry, Sticky { closed, opened })
}

pub fn call(name: &str, kind: &str, delay_ms: u64) -> Value {
  json!({
    "remote_endpoint": {
      "id": delay_ms as i64 + 1000,
      "type": kind,
      "codename": name,
      "data": { "delay_ms": delay_ms }
    }
  })
}

pub fn component(value: Value) -> Component {
  serde_json::from_value(value).unwrap()
}

pub fn script(script: &str) -> Component {
  component(json!({ "type": "script", "script": script }))
}

pub fn multi(calls: Vec<Value>) -> Component {
  component(json!({ "type": "multi", "calls": calls }))
}
