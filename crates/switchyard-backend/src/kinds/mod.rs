//! One module per backend kind.

mod custom_function;
mod http;
mod ldap;
mod mongo;
mod push;
mod redis;
mod script;
mod smtp;
mod soap;
mod sql;
mod store;

use serde_json::{Map, Value};
use url::Url;

use crate::RequestError;

pub use custom_function::{CustomFunctionFactory, CustomFunctionRequest, CustomFunctionResponse, FunctionSpec};
pub use http::{HttpFactory, HttpRequest, HttpResponse, HttpSpec, complete_url};
pub use ldap::{LdapConnection, LdapFactory, LdapOperation, LdapRequest, LdapResponse, LdapSpec};
pub use mongo::{MongoConfig, MongoFactory, MongoOperation, MongoRequest, MongoResponse, MongoSpec};
pub use push::{PushFactory, PushRequest, PushResponse, PushSpec};
pub use self::redis::{RedisConfig, RedisFactory, RedisRequest, RedisResponse, RedisSpec, reply_to_json};
pub use script::{ScriptFactory, ScriptRequest, ScriptResponse, ScriptSpec, interpreters};
pub use smtp::{SmtpFactory, SmtpRequest, SmtpResponse, SmtpSpec};
pub use soap::{SoapFactory, SoapRequest, SoapResponse, SoapSpec};
pub use sql::{SqlConfig, SqlFactory, SqlRequest, SqlResponse, SqlSpec, normalize_parameters};
pub use store::{StoreFactory, StoreRequest, StoreResponse, StoreSpec};

/// Positional argument `index` of a `{"0": …, "1": …}` map.
pub(crate) fn argument(arguments: &Map<String, Value>, index: usize) -> Option<&Value> {
  arguments.get(&index.to_string())
}

/// `user[:password]@` for a connection string, encoded the way `url`
/// encodes userinfo. Empty when both parts are empty.
pub(crate) fn userinfo(user: &str, password: &str) -> Result<String, RequestError> {
  if user.is_empty() && password.is_empty() {
    return Ok(String::new());
  }

  let invalid = |()| RequestError::validation("credentials cannot be encoded in a connection string");
  let mut url = Url::parse("dsn://host").map_err(|e| RequestError::validation(e.to_string()))?;
  url.set_username(user).map_err(invalid)?;
  if !password.is_empty() {
    url.set_password(Some(password)).map_err(invalid)?;
  }

  Ok(match url.password() {
    Some(password) => format!("{}:{password}@", url.username()),
    None => format!("{}@", url.username()),
  })
}
