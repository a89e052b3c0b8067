//! Switchyard Model
//!
//! This crate contains the immutable definition types the orchestration engine
//! walks for every incoming request:
//!
//! ```text
//! ProxyEndpoint
//! └── components: Vec<Component>
//!     ├── Single { call }      ─┐
//!     ├── Multi { calls }      ─┴── Call ── RemoteEndpoint (type + data + env override)
//!     └── Script { script }
//! ```
//!
//! Definitions are loaded from storage (or JSON files) by an outer layer and
//! treated as read-only by the engine.

mod call;
mod component;
mod endpoint;
mod error;
mod remote_endpoint;

pub use call::Call;
pub use component::{Component, ComponentKind, Transformation};
pub use endpoint::ProxyEndpoint;
pub use error::ModelError;
pub use remote_endpoint::{RemoteEndpoint, RemoteEndpointType};
