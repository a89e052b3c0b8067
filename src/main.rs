use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use switchyard_engine::{Engine, EngineConfig};
use switchyard_model::ProxyEndpoint;
use switchyard_sandbox_lua::LuaSandbox;

const CONFIG_FILE: &str = "switchyard.yaml";

/// Switchyard - an API gateway engine that fans endpoint calls out to backends
#[derive(Parser)]
#[command(name = "switchyard")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.switchyard)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Engine configuration file (default: <data-dir>/switchyard.yaml)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Log filter, overriding RUST_LOG
  #[arg(long, global = true)]
  log_level: Option<String>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a proxy endpoint against a request read from stdin
  Run {
    /// Path to the proxy endpoint definition (JSON)
    endpoint_file: PathBuf,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.log_level.as_deref());

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".switchyard"),
  };

  match cli.command {
    Some(Commands::Run { endpoint_file }) => {
      let config = load_config(&data_dir, cli.config.as_deref())?;
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_endpoint(endpoint_file, config))?;
    }
    None => {
      println!("switchyard - use --help to see available commands");
    }
  }

  Ok(())
}

fn init_tracing(level: Option<&str>) {
  let filter = match level {
    Some(level) => EnvFilter::new(level),
    None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .init();
}

/// Defaults, then the YAML file, then `SWITCHYARD_` variables.
fn load_config(data_dir: &Path, path: Option<&Path>) -> Result<EngineConfig> {
  let mut figment = Figment::new().merge(Serialized::defaults(EngineConfig::default()));

  match path {
    Some(path) => {
      if !path.exists() {
        anyhow::bail!("config file not found: {}", path.display());
      }
      figment = figment.merge(Yaml::file(path));
    }
    None => {
      let default = data_dir.join(CONFIG_FILE);
      if default.exists() {
        figment = figment.merge(Yaml::file(default));
      }
    }
  }

  figment
    .merge(Env::prefixed("SWITCHYARD_").split("__"))
    .extract()
    .context("failed to load engine configuration")
}

async fn run_endpoint(endpoint_file: PathBuf, config: EngineConfig) -> Result<()> {
  let content = tokio::fs::read_to_string(&endpoint_file)
    .await
    .with_context(|| format!("failed to read endpoint file: {}", endpoint_file.display()))?;

  let endpoint: ProxyEndpoint = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse endpoint file: {}", endpoint_file.display()))?;

  info!(endpoint_id = endpoint.id, components = endpoint.components.len(), "endpoint_loaded");

  let request = read_request_from_stdin()?;

  let engine = Engine::new(config).context("failed to create engine")?;
  let mut sandbox = LuaSandbox::new().context("failed to create script sandbox")?;

  let invocation = engine
    .invoke(&mut sandbox, &endpoint, &request)
    .await
    .context("endpoint invocation failed")?;

  if invocation.outcome.timed_out {
    warn!(endpoint_id = endpoint.id, "response_partial");
  }

  println!("{}", serde_json::to_string_pretty(&invocation.response)?);

  Ok(())
}

fn read_request_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read request from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse request JSON from stdin")
  }
}
