//! Switchyard Backend
//!
//! The uniform contract every backend kind satisfies, and the machinery that
//! turns a script-authored payload into a ready-to-run request:
//!
//! ```text
//!                      ┌───────────────────┐
//!  payload ──────────▶ │  RequestBuilder   │  enabled? __type matches?
//!  RemoteEndpoint ───▶ └─────────┬─────────┘
//!                                │ kind
//!                      ┌─────────▼─────────┐
//!                      │  RequestRegistry  │  kind ─▶ RequestFactory
//!                      └─────────┬─────────┘
//!                                │ overlay::resolve::<Spec>()
//!          ┌──────────┬──────────┼───────────┬──────────────┐
//!          ▼          ▼          ▼           ▼              ▼
//!        http       sql       ldap        script   ...  custom_function
//!        soap    (pool)   (ConnectionRegistry)
//!                                │
//!                                ▼
//!                     Arc<dyn Request> ── perform() ──▶ Box<dyn Response>
//! ```
//!
//! Backend failures never surface as errors from [`Request::perform`]; they
//! are carried in the response's `error` field so sibling calls are
//! unaffected.

mod builder;
mod connections;
mod error;
pub mod kinds;
pub mod overlay;
mod registry;
mod request;

pub use builder::{RequestBuilder, TYPE_TAG};
pub use connections::{ConnectionCloseError, ConnectionRegistry, StickyConnection};
pub use error::RequestError;
pub use kinds::FunctionSpec;
pub use registry::{BuildContext, Collaborators, RequestFactory, RequestRegistry};
pub use request::{ErrorResponse, Request, Response};
