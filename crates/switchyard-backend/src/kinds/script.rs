//! Process execution.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;

use crate::request::{marshal, to_json};
use crate::{BuildContext, ErrorResponse, Request, RequestError, RequestFactory, Response, overlay};

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const WINDOWS_SHELL: &str = "cmd.exe";

static STAGED: AtomicU64 = AtomicU64::new(0);

/// Interpreters a script may name on this platform.
pub fn interpreters() -> &'static [&'static str] {
  if cfg!(windows) {
    &[WINDOWS_SHELL]
  } else if cfg!(target_os = "linux") {
    &["sh", "bash"]
  } else {
    &["sh"]
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
  pub interpreter: String,
  /// Seconds; zero means the default.
  pub timeout: u64,
  pub filepath: String,
  pub script: String,
}

/// Script-facing shape of a process execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSpec {
  pub config: ScriptConfig,
  /// The complete process environment.
  pub env: BTreeMap<String, String>,
}

pub struct ScriptRequest {
  spec: ScriptSpec,
  path: PathBuf,
  timeout: Duration,
}

impl ScriptRequest {
  pub fn new(spec: ScriptSpec) -> Result<Self, RequestError> {
    let config = &spec.config;
    if !interpreters().contains(&config.interpreter.as_str()) {
      return Err(RequestError::validation(format!(
        "invalid interpreter '{}', expected one of {:?}",
        config.interpreter,
        interpreters()
      )));
    }
    if config.filepath.is_empty() && config.script.is_empty() {
      return Err(RequestError::validation("a filepath or script must be set"));
    }

    let path = if config.filepath.is_empty() {
      inline_path(&config.interpreter, &config.script)
    } else {
      PathBuf::from(&config.filepath)
    };
    let timeout = Duration::from_secs(if config.timeout == 0 {
      DEFAULT_TIMEOUT_SECS
    } else {
      config.timeout
    });

    Ok(Self { spec, path, timeout })
  }

  pub fn path(&self) -> &std::path::Path {
    &self.path
  }

  /// Write an inline script to its content-addressed path unless already there.
  /// The file is staged under a unique name and renamed into place, so a
  /// concurrent run never sees it partly written.
  async fn materialize(&self) -> std::io::Result<()> {
    if self.spec.config.script.is_empty() || tokio::fs::try_exists(&self.path).await? {
      return Ok(());
    }
    let staged = self.path.with_extension(format!(
      "{}.{}.tmp",
      std::process::id(),
      STAGED.fetch_add(1, Ordering::Relaxed)
    ));
    tokio::fs::write(&staged, &self.spec.config.script).await?;
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      tokio::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o777)).await?;
    }
    if let Err(e) = tokio::fs::rename(&staged, &self.path).await {
      let _ = tokio::fs::remove_file(&staged).await;
      return Err(e);
    }
    debug!(path = %self.path.display(), "script_written");
    Ok(())
  }

  fn command(&self) -> Command {
    let interpreter = &self.spec.config.interpreter;
    let mut command = Command::new(interpreter);
    if interpreter == WINDOWS_SHELL {
      command.arg("/C");
    }
    command
      .arg(&self.path)
      .env_clear()
      .envs(&self.spec.env)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);
    command
  }

  async fn run(&self) -> Result<ScriptResponse, String> {
    self
      .materialize()
      .await
      .map_err(|e| format!("failed to write script {}: {e}", self.path.display()))?;

    let child = self
      .command()
      .spawn()
      .map_err(|e| format!("failed to start {}: {e}", self.spec.config.interpreter))?;
    let pid = child.id().unwrap_or_default();

    // Dropping the wait future on timeout kills the child.
    let output = tokio::time::timeout(self.timeout, child.wait_with_output())
      .await
      .map_err(|_| "the script timed out".to_string())?
      .map_err(|e| e.to_string())?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(format!("script exited with {}: {}", output.status, stderr.trim()));
    }
    Ok(ScriptResponse {
      stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
      pid,
    })
  }
}

fn inline_path(interpreter: &str, script: &str) -> PathBuf {
  let mut name = hex::encode(Sha256::digest(script.as_bytes()));
  if interpreter == WINDOWS_SHELL {
    name.push_str(".bat");
  }
  std::env::temp_dir().join(name)
}

#[derive(Debug, Serialize)]
pub struct ScriptResponse {
  pub stdout: String,
  pub pid: u32,
}

impl Response for ScriptResponse {
  fn to_json(&self) -> Value {
    to_json(self)
  }

  fn log(&self) -> String {
    format!("pid={}", self.pid)
  }

  fn error(&self) -> Option<&str> {
    None
  }
}

#[async_trait]
impl Request for ScriptRequest {
  async fn perform(&self) -> Box<dyn Response> {
    match self.run().await {
      Ok(response) => Box::new(response),
      Err(e) => ErrorResponse::boxed(e),
    }
  }

  fn log(&self, dev_mode: bool) -> String {
    let line = format!("{} {}", self.spec.config.interpreter, self.path.display());
    if dev_mode {
      let env = self
        .spec
        .env
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ");
      format!("{env} {line}").trim_start().to_string()
    } else {
      line
    }
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    marshal(&self.spec)
  }
}

pub struct ScriptFactory;

#[async_trait]
impl RequestFactory for ScriptFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let spec: ScriptSpec = overlay::resolve(ctx.remote_endpoint, ctx.payload)?;
    Ok(Arc::new(ScriptRequest::new(spec)?))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn spec(value: Value) -> ScriptSpec {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_validation() {
    assert!(ScriptRequest::new(spec(json!({ "config": { "interpreter": "python", "script": "x" } }))).is_err());
    assert!(ScriptRequest::new(spec(json!({ "config": { "interpreter": "sh" } }))).is_err());
  }

  #[cfg(unix)]
  #[test]
  fn test_inline_script_path_is_content_addressed() {
    let first = ScriptRequest::new(spec(json!({ "config": { "interpreter": "sh", "script": "echo hi" } }))).unwrap();
    let second = ScriptRequest::new(spec(json!({ "config": { "interpreter": "sh", "script": "echo hi" } }))).unwrap();
    let other = ScriptRequest::new(spec(json!({ "config": { "interpreter": "sh", "script": "echo bye" } }))).unwrap();

    assert_eq!(first.path(), second.path());
    assert_ne!(first.path(), other.path());
    assert!(first.path().starts_with(std::env::temp_dir()));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_concurrent_materialize_writes_whole_script() {
    let nonce = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .unwrap()
      .as_nanos();
    let script = format!("# {nonce}\n{}echo done\n", "echo filler\n".repeat(4096));
    let request = Arc::new(
      ScriptRequest::new(spec(json!({ "config": { "interpreter": "sh", "script": script.clone() } }))).unwrap(),
    );

    let tasks: Vec<_> = (0..8)
      .map(|_| {
        let request = Arc::clone(&request);
        tokio::spawn(async move {
          request.materialize().await.unwrap();
          tokio::fs::read_to_string(request.path()).await.unwrap()
        })
      })
      .collect();
    for task in tasks {
      assert_eq!(task.await.unwrap(), script);
    }
    let _ = tokio::fs::remove_file(request.path()).await;
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_runs_with_given_environment() {
    let request = ScriptRequest::new(spec(json!({
      "config": { "interpreter": "sh", "script": "echo \"hello $GREETING_TARGET\"" },
      "env": { "GREETING_TARGET": "world" }
    })))
    .unwrap();

    let response = request.perform().await;
    assert!(response.error().is_none(), "{:?}", response.error());
    let json = response.to_json();
    assert_eq!(json["stdout"], json!("hello world\n"));
    assert!(json["pid"].as_u64().unwrap() > 0);
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_timeout_kills_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slow.sh");
    std::fs::write(&path, "while :; do :; done\n").unwrap();

    let request = ScriptRequest::new(spec(json!({
      "config": { "interpreter": "sh", "filepath": path.to_str().unwrap(), "timeout": 1 }
    })))
    .unwrap();

    let started = std::time::Instant::now();
    let response = request.perform().await;
    assert_eq!(response.error(), Some("the script timed out"));
    assert!(started.elapsed() < Duration::from_secs(5));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_non_zero_exit_is_an_error_response() {
    let request = ScriptRequest::new(spec(json!({
      "config": { "interpreter": "sh", "script": "echo broken >&2; exit 3" }
    })))
    .unwrap();

    let response = request.perform().await;
    assert!(response.error().unwrap().contains("broken"));
  }
}
