use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use switchyard_backend::{Collaborators, ConnectionRegistry, RequestBuilder, RequestRegistry};
use switchyard_model::{Component, ComponentKind, ProxyEndpoint, Transformation};
use switchyard_pool::ConnectionPool;
use switchyard_sandbox::{Sandbox, SandboxError, is_valid_identifier};
use switchyard_store::MemoryStore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{EngineConfig, EngineError};

/// What a [`Engine::run_components`] pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
  /// A script component returned the stop signal.
  pub stopped: bool,
  /// The script budget ran out and the remaining work was abandoned.
  pub timed_out: bool,
  /// Wall time spent waiting on backends, summed over dispatches.
  pub backend_time: Duration,
  /// Components whose conditional passed.
  pub components_run: usize,
}

/// The result of a full endpoint invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
  pub invocation_id: Uuid,
  /// The `response` global after the last component ran.
  pub response: Value,
  pub outcome: RunOutcome,
}

/// Evaluates proxy endpoints against a sandbox.
///
/// One engine serves many invocations; per-invocation state lives in the
/// sandbox and in the connection registry each run creates.
pub struct Engine {
  config: EngineConfig,
  builder: RequestBuilder,
}

impl Engine {
  /// An engine with the standard backend kinds, a fresh connection pool and
  /// an in-memory document store.
  pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
    let collaborators = Collaborators::new(config.http_timeout)
      .with_pool(Arc::new(ConnectionPool::new()))
      .with_store(Arc::new(MemoryStore::new()))
      .with_functions(config.functions.clone());
    Self::with_collaborators(config, collaborators)
  }

  pub fn with_collaborators(config: EngineConfig, collaborators: Collaborators) -> Result<Self, EngineError> {
    let registry = RequestRegistry::standard(collaborators)?;
    Ok(Self::with_registry(config, registry))
  }

  /// An engine that builds requests only through `registry`.
  pub fn with_registry(config: EngineConfig, registry: RequestRegistry) -> Self {
    let builder = RequestBuilder::new(registry, config.remote_endpoints.enabled.iter().copied());
    Self { config, builder }
  }

  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  pub(crate) fn builder(&self) -> &RequestBuilder {
    &self.builder
  }

  /// Run `endpoint` for one incoming `request`.
  ///
  /// Sets the `request`, `env` and `response` globals, runs every component
  /// and returns the final `response`.
  #[instrument(
    name = "endpoint_invoke",
    skip(self, sandbox, endpoint, request),
    fields(endpoint_id = endpoint.id, invocation_id = tracing::field::Empty)
  )]
  pub async fn invoke(
    &self,
    sandbox: &mut dyn Sandbox,
    endpoint: &ProxyEndpoint,
    request: &Value,
  ) -> Result<Invocation, EngineError> {
    let invocation_id = Uuid::new_v4();
    tracing::Span::current().record("invocation_id", tracing::field::display(invocation_id));

    let started = Instant::now();
    info!(endpoint_name = %endpoint.name, components = endpoint.components.len(), "endpoint_started");

    match self.invoke_inner(sandbox, endpoint, request).await {
      Ok((response, outcome)) => {
        info!(
          duration_ms = started.elapsed().as_millis() as u64,
          backend_ms = outcome.backend_time.as_millis() as u64,
          components_run = outcome.components_run,
          stopped = outcome.stopped,
          timed_out = outcome.timed_out,
          "endpoint_completed"
        );
        Ok(Invocation {
          invocation_id,
          response,
          outcome,
        })
      }
      Err(e) => {
        error!(error = %e, "endpoint_failed");
        Err(e)
      }
    }
  }

  async fn invoke_inner(
    &self,
    sandbox: &mut dyn Sandbox,
    endpoint: &ProxyEndpoint,
    request: &Value,
  ) -> Result<(Value, RunOutcome), EngineError> {
    sandbox.set_time_budget(endpoint.code_timeout(self.config.code_timeout));
    sandbox.set("request", request)?;
    sandbox.set("env", endpoint.environment.as_ref().unwrap_or(&json!({})))?;
    sandbox.set("response", &json!({ "statusCode": 200, "headers": {} }))?;

    let outcome = self.run_components(sandbox, &endpoint.components).await?;
    let response = sandbox.get("response")?;
    Ok((response, outcome))
  }

  /// Run `components` in order against `sandbox`.
  ///
  /// Sticky connections opened along the way are closed before returning, on
  /// every path. A budget timeout ends the run early but is not an error.
  #[instrument(name = "run_components", skip_all, fields(components = components.len()))]
  pub async fn run_components(
    &self,
    sandbox: &mut dyn Sandbox,
    components: &[Component],
  ) -> Result<RunOutcome, EngineError> {
    let mut connections = ConnectionRegistry::new();
    let mut outcome = RunOutcome::default();

    let result = match self.walk(sandbox, components, &mut connections, &mut outcome).await {
      Err(e) if e.is_timeout() => {
        warn!(error = %e, components_run = outcome.components_run, "script_timeout");
        outcome.timed_out = true;
        Ok(())
      }
      other => other,
    };

    match connections.close_all().await {
      Ok(()) => result.map(|()| outcome),
      Err(close) => match result {
        Ok(()) => Err(close.into()),
        Err(e) => {
          error!(error = %close, "connection_close_failed");
          Err(e)
        }
      },
    }
  }

  async fn walk(
    &self,
    sandbox: &mut dyn Sandbox,
    components: &[Component],
    connections: &mut ConnectionRegistry,
    outcome: &mut RunOutcome,
  ) -> Result<(), EngineError> {
    for component in components {
      let component = component.resolve();
      if !condition_holds(sandbox, &component.conditional, component.conditional_positive)? {
        debug!(component_id = component.id, "component_skipped");
        continue;
      }
      outcome.components_run += 1;

      let stop = match &component.kind {
        ComponentKind::Single { .. } | ComponentKind::Multi { .. } => {
          let names = call_names(component)?;
          sandbox.declare_calls(&names)?;
          run_transformations(sandbox, &component.before)?;
          self
            .run_calls(sandbox, component.calls(), connections, outcome)
            .await?;
          false
        }
        ComponentKind::Script { script } => {
          run_transformations(sandbox, &component.before)?;
          let (_, stop) = sandbox.run_with_stop(script)?;
          stop
        }
      };

      if stop {
        info!(component_id = component.id, "endpoint_stopped");
        outcome.stopped = true;
        return Ok(());
      }
      run_transformations(sandbox, &component.after)?;
    }
    Ok(())
  }
}

/// Names of every call in `component`, checked as sandbox identifiers.
fn call_names(component: &Component) -> Result<Vec<String>, EngineError> {
  component
    .calls()
    .iter()
    .map(|call| {
      let name = call.name()?;
      if !is_valid_identifier(name) {
        return Err(EngineError::configuration(format!("invalid call name '{name}'")));
      }
      Ok(name.to_string())
    })
    .collect()
}

/// Empty conditionals always hold; otherwise the expression's truthiness must
/// match `positive`.
pub(crate) fn condition_holds(
  sandbox: &mut dyn Sandbox,
  conditional: &str,
  positive: bool,
) -> Result<bool, SandboxError> {
  let expr = conditional.trim();
  if expr.is_empty() {
    return Ok(true);
  }
  Ok(sandbox.evaluate_condition(expr)? == positive)
}

pub(crate) fn run_transformations(
  sandbox: &mut dyn Sandbox,
  transformations: &[Transformation],
) -> Result<(), SandboxError> {
  for transformation in transformations {
    sandbox.run(&transformation.script)?;
  }
  Ok(())
}
