//! Operator-defined functions run as child processes.
//!
//! The call input is written to the process's stdin as JSON; stdout is read
//! back as the JSON output.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::argument;
use crate::request::{marshal, non_empty, to_json};
use crate::{BuildContext, Request, RequestError, RequestFactory, Response, overlay};

const TIMEOUT: Duration = Duration::from_secs(60);

/// How to launch one custom function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
  /// Program followed by its arguments.
  pub command: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomFunctionSpec {
  pub arguments: Map<String, Value>,
}

pub struct CustomFunctionRequest {
  spec: CustomFunctionSpec,
  account_id: i64,
  api_id: i64,
  functions: Arc<HashMap<String, FunctionSpec>>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomFunctionResponse {
  pub output: Value,
  pub stderr: String,
  pub status_code: i32,
  #[serde(skip_serializing_if = "String::is_empty")]
  pub error: String,
}

impl CustomFunctionResponse {
  fn failed(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      ..Default::default()
    }
  }
}

impl Response for CustomFunctionResponse {
  fn to_json(&self) -> Value {
    to_json(self)
  }

  fn log(&self) -> String {
    match self.error() {
      Some(error) => error.to_string(),
      None => "Custom function successful".to_string(),
    }
  }

  fn error(&self) -> Option<&str> {
    non_empty(&self.error)
  }
}

impl CustomFunctionRequest {
  async fn call(&self) -> CustomFunctionResponse {
    if argument(&self.spec.arguments, 0).and_then(Value::as_str) != Some("call") {
      return CustomFunctionResponse::failed("Invalid operation");
    }
    let Some(name) = argument(&self.spec.arguments, 1).and_then(Value::as_str) else {
      return CustomFunctionResponse::failed("name is not a string");
    };
    let Some((program, args)) = self
      .functions
      .get(name)
      .and_then(|function| function.command.split_first())
    else {
      return CustomFunctionResponse::failed(format!("custom function '{name}' is not defined"));
    };
    let input = argument(&self.spec.arguments, 2).cloned().unwrap_or(Value::Null);

    match self.run(program, args, &input).await {
      Ok(response) => response,
      Err(e) => CustomFunctionResponse::failed(format!("custom function '{name}' failed: {e}")),
    }
  }

  async fn run(&self, program: &str, args: &[String], input: &Value) -> Result<CustomFunctionResponse, String> {
    let mut child = Command::new(program)
      .args(args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|e| e.to_string())?;

    let bytes = serde_json::to_vec(input).map_err(|e| e.to_string())?;
    let stdin = child.stdin.take();
    let feed = async move {
      if let Some(mut stdin) = stdin {
        // A function that ignores its input may exit before reading it.
        if let Err(e) = stdin.write_all(&bytes).await {
          if e.kind() != std::io::ErrorKind::BrokenPipe {
            return Err(e);
          }
        }
      }
      Ok(())
    };

    // Stdout is drained while stdin is still being written.
    let (fed, output) = tokio::time::timeout(TIMEOUT, async { tokio::join!(feed, child.wait_with_output()) })
      .await
      .map_err(|_| "timed out".to_string())?;
    fed.map_err(|e: std::io::Error| e.to_string())?;
    let output = output.map_err(|e| e.to_string())?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed = if stdout.trim().is_empty() {
      Value::Null
    } else {
      serde_json::from_str(&stdout).unwrap_or_else(|_| Value::String(stdout.trim_end().to_string()))
    };
    let status_code = output.status.code().unwrap_or(-1);

    Ok(CustomFunctionResponse {
      output: parsed,
      stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
      status_code,
      error: if output.status.success() {
        String::new()
      } else {
        format!("exited with {}", output.status)
      },
    })
  }
}

#[async_trait]
impl Request for CustomFunctionRequest {
  async fn perform(&self) -> Box<dyn Response> {
    Box::new(self.call().await)
  }

  fn log(&self, dev_mode: bool) -> String {
    let mut line = format!("Arguments: {}", Value::Object(self.spec.arguments.clone()));
    if dev_mode {
      line.push_str(&format!("\nAccountID: {}\nAPIID: {}", self.account_id, self.api_id));
    }
    line
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    marshal(&self.spec)
  }
}

pub struct CustomFunctionFactory {
  functions: Arc<HashMap<String, FunctionSpec>>,
}

impl CustomFunctionFactory {
  pub fn new(functions: HashMap<String, FunctionSpec>) -> Self {
    Self {
      functions: Arc::new(functions),
    }
  }
}

#[async_trait]
impl RequestFactory for CustomFunctionFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let spec: CustomFunctionSpec = overlay::resolve(ctx.remote_endpoint, ctx.payload)?;
    Ok(Arc::new(CustomFunctionRequest {
      spec,
      account_id: ctx.remote_endpoint.account_id,
      api_id: ctx.remote_endpoint.api_id,
      functions: Arc::clone(&self.functions),
    }))
  }
}
