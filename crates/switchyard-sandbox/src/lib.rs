//! Switchyard Sandbox
//!
//! The engine treats the script interpreter as an opaque capability behind the
//! [`Sandbox`] trait. Conditionals, before/after transformations, raw script
//! components and call-object bookkeeping all go through it:
//!
//! ```text
//! Engine ──► Sandbox::evaluate_condition   (component / call conditionals)
//!        ──► Sandbox::run                  (before / after transformations)
//!        ──► Sandbox::run_with_stop        (script components)
//!        ──► Sandbox::declare_calls        (call objects for a component)
//!        ──► Sandbox::prepare_raw_requests (request payloads per call)
//!        ──► Sandbox::insert_responses     (results, one transactional step)
//! ```
//!
//! Implementations own their execution budget. When it runs out they fail the
//! current script with an error whose text carries [`TIMEOUT_MESSAGE`], which
//! callers detect through [`SandboxError::is_timeout`].

mod error;
mod ident;

use std::time::Duration;

use serde_json::Value;

pub use error::SandboxError;
pub use ident::is_valid_identifier;

/// Text carried by every error raised when a sandbox exhausts its budget.
pub const TIMEOUT_MESSAGE: &str = "script took too long to execute";

/// An embedded script execution context.
///
/// One sandbox serves exactly one endpoint invocation; its global state
/// (`request`, `response`, call objects) persists between calls.
pub trait Sandbox: Send {
  /// Evaluate a script or expression and return its value as JSON.
  fn run(&mut self, script: &str) -> Result<Value, SandboxError>;

  /// Evaluate an expression and coerce the result with the sandbox's own
  /// truthiness rules.
  fn evaluate_condition(&mut self, expr: &str) -> Result<bool, SandboxError>;

  /// Run a script that may signal the whole pipeline to stop.
  ///
  /// Returns the script's value and whether it returned the stop signal.
  fn run_with_stop(&mut self, script: &str) -> Result<(Value, bool), SandboxError>;

  /// Read a global as JSON. Missing globals read as `Value::Null`.
  fn get(&mut self, name: &str) -> Result<Value, SandboxError>;

  /// Write a global from JSON.
  fn set(&mut self, name: &str, value: &Value) -> Result<(), SandboxError>;

  /// Ensure a call object exists for each name, keeping existing ones.
  fn declare_calls(&mut self, names: &[String]) -> Result<(), SandboxError>;

  /// The `request` member of each named call object, or `{}` when absent.
  fn prepare_raw_requests(&mut self, names: &[String]) -> Result<Vec<Value>, SandboxError>;

  /// Attach `responses[i]` to the call object `names[i]` in one step.
  fn insert_responses(&mut self, names: &[String], responses: &[Value]) -> Result<(), SandboxError>;

  /// Set the total script execution budget. Time already spent counts against
  /// it.
  fn set_time_budget(&mut self, _budget: Duration) {}
}
