use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use switchyard_model::{RemoteEndpoint, RemoteEndpointType};
use switchyard_pool::{ConnectionPool, ConnectionSpec, Driver};
use switchyard_store::DocumentStore;

use crate::kinds::{
  CustomFunctionFactory, FunctionSpec, HttpFactory, LdapFactory, MongoFactory, PushFactory, RedisFactory,
  ScriptFactory, SmtpFactory, SoapFactory, SqlFactory, StoreFactory,
};
use crate::{ConnectionRegistry, Request, RequestError};

/// Everything a factory may read while building one request.
pub struct BuildContext<'a> {
  pub remote_endpoint: &'a RemoteEndpoint,
  pub payload: &'a Value,
  pub connections: &'a mut ConnectionRegistry,
}

/// Builds requests for one backend kind.
#[async_trait]
pub trait RequestFactory: Send + Sync {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError>;
}

/// Shared services handed to the standard factories.
#[derive(Clone)]
pub struct Collaborators {
  pub pool: Option<Arc<ConnectionPool>>,
  pub store: Option<Arc<dyn DocumentStore>>,
  pub http_timeout: Duration,
  pub functions: HashMap<String, FunctionSpec>,
}

impl Collaborators {
  pub fn new(http_timeout: Duration) -> Self {
    Self {
      pool: None,
      store: None,
      http_timeout,
      functions: HashMap::new(),
    }
  }

  pub fn with_pool(mut self, pool: Arc<ConnectionPool>) -> Self {
    self.pool = Some(pool);
    self
  }

  pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
    self.store = Some(store);
    self
  }

  pub fn with_functions(mut self, functions: HashMap<String, FunctionSpec>) -> Self {
    self.functions = functions;
    self
  }
}

/// Maps each backend kind to the factory that builds its requests.
#[derive(Default)]
pub struct RequestRegistry {
  factories: HashMap<RemoteEndpointType, Box<dyn RequestFactory>>,
}

impl RequestRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `factory` for `kind`, replacing any earlier registration.
  pub fn register(&mut self, kind: RemoteEndpointType, factory: impl RequestFactory + 'static) -> &mut Self {
    self.factories.insert(kind, Box::new(factory));
    self
  }

  pub fn get(&self, kind: RemoteEndpointType) -> Option<&dyn RequestFactory> {
    self.factories.get(&kind).map(|factory| factory.as_ref())
  }

  pub fn contains(&self, kind: RemoteEndpointType) -> bool {
    self.factories.contains_key(&kind)
  }

  /// A registry with a factory for every kind this build has a driver for.
  pub fn standard(collaborators: Collaborators) -> Result<Self, RequestError> {
    let Collaborators {
      pool,
      store,
      http_timeout,
      functions,
    } = collaborators;

    let mut registry = Self::new();
    registry
      .register(RemoteEndpointType::Http, HttpFactory::new(http_timeout)?)
      .register(RemoteEndpointType::Soap, SoapFactory::new(http_timeout)?)
      .register(RemoteEndpointType::Postgres, SqlFactory::new(Driver::Postgres, pool.clone()))
      .register(RemoteEndpointType::MySql, SqlFactory::new(Driver::MySql, pool.clone()))
      .register(RemoteEndpointType::Sqlite, SqlFactory::new(Driver::Sqlite, pool.clone()))
      .register(RemoteEndpointType::Mongo, MongoFactory::new(pool.clone()))
      .register(RemoteEndpointType::Ldap, LdapFactory)
      .register(RemoteEndpointType::Redis, RedisFactory::new(pool))
      .register(RemoteEndpointType::Script, ScriptFactory)
      .register(RemoteEndpointType::Store, StoreFactory::new(store))
      .register(RemoteEndpointType::Push, PushFactory::new(http_timeout)?)
      .register(RemoteEndpointType::Smtp, SmtpFactory)
      .register(RemoteEndpointType::CustomFunction, CustomFunctionFactory::new(functions));
    Ok(registry)
  }
}

/// Fetch the pooled handle for `spec` and downcast it to `T`.
pub(crate) async fn acquire<T: Any + Send + Sync>(
  pool: Option<&ConnectionPool>,
  spec: &ConnectionSpec,
) -> Result<Arc<T>, RequestError> {
  let pool =
    pool.ok_or_else(|| RequestError::configuration(format!("no connection pool is set up for {}", spec.driver)))?;
  let handle = pool
    .connect(spec)
    .await
    .map_err(|e| RequestError::configuration(e.to_string()))?;
  handle.downcast::<T>().map_err(|_| {
    RequestError::configuration(format!(
      "pooled {} handle is not a {}",
      spec.driver,
      std::any::type_name::<T>()
    ))
  })
}
