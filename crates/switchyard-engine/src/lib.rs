//! Switchyard Engine
//!
//! Runs a proxy endpoint's components against one sandbox and fans each
//! component's backend calls out concurrently.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │  - invoke(sandbox, endpoint, request) → Invocation          │
//! │  - run_components: conditionals, before/after, stop         │
//! │  - owns the per-invocation ConnectionRegistry               │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Call evaluation                         │
//! │  - active calls → before → raw payloads                     │
//! │  - RequestBuilder::prepare_request, one call at a time      │
//! │  - insert_responses in one step → after                     │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        dispatch                             │
//! │  - one task per request, results slotted by index           │
//! │  - waits for every request, never cancels siblings          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use switchyard_engine::{Engine, EngineConfig};
//! use switchyard_sandbox_lua::LuaSandbox;
//!
//! let engine = Engine::new(EngineConfig::default())?;
//! let mut sandbox = LuaSandbox::new()?;
//! let invocation = engine.invoke(&mut sandbox, &endpoint, &request).await?;
//! println!("{}", invocation.response);
//! ```

mod calls;
mod config;
mod dispatch;
mod engine;
mod error;

pub use config::{EngineConfig, RemoteEndpointsConfig};
pub use dispatch::{Dispatched, dispatch};
pub use engine::{Engine, Invocation, RunOutcome};
pub use error::EngineError;
