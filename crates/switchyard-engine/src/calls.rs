use std::sync::Arc;

use serde_json::Value;
use switchyard_backend::{ConnectionRegistry, Request};
use switchyard_model::Call;
use switchyard_sandbox::Sandbox;
use tracing::info;

use crate::dispatch::dispatch;
use crate::engine::{Engine, RunOutcome, condition_holds, run_transformations};
use crate::EngineError;

impl Engine {
  /// Evaluate one component's calls: build them in order, perform them
  /// together and hand the responses back in one step.
  pub(crate) async fn run_calls(
    &self,
    sandbox: &mut dyn Sandbox,
    calls: &[Call],
    connections: &mut ConnectionRegistry,
    outcome: &mut RunOutcome,
  ) -> Result<(), EngineError> {
    let mut active = Vec::with_capacity(calls.len());
    for call in calls {
      if condition_holds(sandbox, &call.conditional, call.conditional_positive)? {
        active.push(call);
      }
    }
    if active.is_empty() {
      return Ok(());
    }

    let mut names = Vec::with_capacity(active.len());
    for call in &active {
      run_transformations(sandbox, &call.before)?;
      names.push(call.name()?.to_string());
    }

    let payloads = sandbox.prepare_raw_requests(&names)?;
    let mut requests: Vec<Arc<dyn Request>> = Vec::with_capacity(active.len());
    for (call, payload) in active.iter().zip(&payloads) {
      let remote_endpoint = call.remote_endpoint()?;
      let request = self
        .builder()
        .prepare_request(remote_endpoint, payload, connections)
        .await?;
      requests.push(request);
    }

    let dispatched = dispatch(requests, self.config().dev_mode).await;
    outcome.backend_time += dispatched.elapsed;
    info!(
      calls = names.len(),
      elapsed_ms = dispatched.elapsed.as_millis() as u64,
      "calls_dispatched"
    );

    let responses: Vec<Value> = dispatched.responses.iter().map(|r| r.to_json()).collect();
    sandbox.insert_responses(&names, &responses)?;

    for call in &active {
      run_transformations(sandbox, &call.after)?;
    }
    Ok(())
  }
}
