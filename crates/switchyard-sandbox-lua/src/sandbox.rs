use std::time::Duration;

use mlua::{Lua, LuaOptions, StdLib, Table, Value as LuaValue};
use serde_json::Value;
use switchyard_sandbox::{Sandbox, SandboxError, TIMEOUT_MESSAGE, is_valid_identifier};
use tracing::debug;

use crate::budget::Budget;
use crate::prelude::{self, from_lua, long_string, to_lua};

const DEFAULT_BUDGET: Duration = Duration::from_secs(5);

/// A [`Sandbox`] backed by one Lua 5.4 state.
pub struct LuaSandbox {
  lua: Lua,
  stop: Table,
  budget: Budget,
}

impl LuaSandbox {
  /// Create a sandbox with the default five second budget.
  pub fn new() -> Result<Self, SandboxError> {
    Self::with_budget(DEFAULT_BUDGET)
  }

  pub fn with_budget(budget: Duration) -> Result<Self, SandboxError> {
    let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8;
    let lua = Lua::new_with(libs, LuaOptions::default()).map_err(script_error)?;
    let stop = prelude::install(&lua).map_err(script_error)?;

    let budget = Budget::new(budget);
    budget.install(&lua);

    Ok(Self { lua, stop, budget })
  }

  /// Run `f` against the Lua state with the deadline armed.
  fn metered<T>(&mut self, f: impl FnOnce(&Lua) -> mlua::Result<T>) -> Result<T, SandboxError> {
    if self.budget.remaining().is_zero() {
      return Err(SandboxError::Timeout);
    }
    let started = self.budget.start();
    let result = f(&self.lua);
    self.budget.finish(started);
    result.map_err(script_error)
  }

  fn eval(&mut self, script: &str) -> Result<LuaValue, SandboxError> {
    self.metered(|lua| lua.load(script).set_name("script").eval::<LuaValue>())
  }

  fn to_json(&self, value: LuaValue) -> Result<Value, SandboxError> {
    from_lua(&self.lua, value).map_err(|e| SandboxError::conversion(e.to_string()))
  }

  fn validate(names: &[String]) -> Result<(), SandboxError> {
    match names.iter().find(|name| !is_valid_identifier(name)) {
      Some(name) => Err(SandboxError::InvalidName { name: name.clone() }),
      None => Ok(()),
    }
  }
}

fn script_error(err: mlua::Error) -> SandboxError {
  let message = err.to_string();
  if message.contains(TIMEOUT_MESSAGE) {
    SandboxError::Timeout
  } else {
    SandboxError::script(message)
  }
}

impl Sandbox for LuaSandbox {
  fn run(&mut self, script: &str) -> Result<Value, SandboxError> {
    let value = self.eval(script)?;
    self.to_json(value)
  }

  fn evaluate_condition(&mut self, expr: &str) -> Result<bool, SandboxError> {
    let value = self.eval(expr)?;
    Ok(!matches!(value, LuaValue::Nil | LuaValue::Boolean(false)))
  }

  fn run_with_stop(&mut self, script: &str) -> Result<(Value, bool), SandboxError> {
    let value = self.eval(script)?;
    if let LuaValue::Table(table) = &value {
      if table.to_pointer() == self.stop.to_pointer() {
        return Ok((Value::Null, true));
      }
    }
    Ok((self.to_json(value)?, false))
  }

  fn get(&mut self, name: &str) -> Result<Value, SandboxError> {
    let value: LuaValue = self.lua.globals().get(name).map_err(script_error)?;
    self.to_json(value)
  }

  fn set(&mut self, name: &str, value: &Value) -> Result<(), SandboxError> {
    let value = to_lua(&self.lua, value).map_err(|e| SandboxError::conversion(e.to_string()))?;
    self.lua.globals().set(name, value).map_err(script_error)
  }

  fn declare_calls(&mut self, names: &[String]) -> Result<(), SandboxError> {
    Self::validate(names)?;
    if names.is_empty() {
      return Ok(());
    }
    let script = names
      .iter()
      .map(|name| format!("{name} = {name} or AP.Call.new()"))
      .collect::<Vec<_>>()
      .join("\n");
    self.metered(|lua| lua.load(script.as_str()).set_name("declare_calls").exec())
  }

  fn prepare_raw_requests(&mut self, names: &[String]) -> Result<Vec<Value>, SandboxError> {
    let globals = self.lua.globals();
    let mut requests = Vec::with_capacity(names.len());
    for name in names {
      let call: LuaValue = globals.get(name.as_str()).map_err(script_error)?;
      let request: LuaValue = match call {
        LuaValue::Table(call) => call.get("request").map_err(script_error)?,
        _ => LuaValue::Nil,
      };
      let request = match request {
        LuaValue::Nil => Value::Object(Default::default()),
        other => self.to_json(other)?,
      };
      requests.push(request);
    }
    Ok(requests)
  }

  fn insert_responses(&mut self, names: &[String], responses: &[Value]) -> Result<(), SandboxError> {
    Self::validate(names)?;
    let json =
      serde_json::to_string(responses).map_err(|e| SandboxError::conversion(e.to_string()))?;
    let names = names
      .iter()
      .map(|name| format!("\"{name}\""))
      .collect::<Vec<_>>()
      .join(", ");
    let script = format!(
      "AP.insertResponses({{{names}}}, AP.json.decode({}))",
      long_string(&json)
    );
    debug!(names = %names, "insert_responses");
    self.metered(|lua| lua.load(script.as_str()).set_name("insert_responses").exec())
  }

  fn set_time_budget(&mut self, budget: Duration) {
    self.budget.set_limit(budget);
  }
}
