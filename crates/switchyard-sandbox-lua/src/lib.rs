//! Lua sandbox for switchyard.
//!
//! [`LuaSandbox`] implements [`switchyard_sandbox::Sandbox`] on top of mlua.
//! Each sandbox owns one Lua state with a restricted standard library (base,
//! table, string, math, utf8) and the `AP` prelude:
//!
//! - `AP.Call.new()` creates a call object with `request` and `response`
//!   members;
//! - `AP.insertResponses(names, responses)` attaches results to call objects;
//! - `AP.json.encode` / `AP.json.decode` move values through JSON;
//! - `log(...)` writes to the `switchyard::script` tracing target;
//! - `stop` is the value a script component returns to end the pipeline.
//!
//! Scripts share one execution budget per sandbox. Only time spent inside
//! Lua counts, so waiting on backends between scripts is free.

mod budget;
mod prelude;
mod sandbox;

pub use sandbox::LuaSandbox;
