use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
  #[error("call has no name: set endpoint_name_override or a remote endpoint codename")]
  UnnamedCall,

  #[error("remote endpoint is not loaded for call '{call}'")]
  RemoteEndpointNotLoaded { call: String },

  #[error("unknown remote endpoint type '{0}'")]
  UnknownEndpointType(String),
}
