use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::request::marshal;
use crate::{BuildContext, Request, RequestError, RequestFactory, Response, overlay};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SmtpConfig {
  pub host: String,
  pub port: u16,
  pub username: String,
  pub password: String,
  pub sender: String,
  /// Plain connection without TLS, for local relays.
  pub disable_tls: bool,
}

/// Script-facing shape of an email.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSpec {
  pub config: SmtpConfig,
  pub address: String,
  pub subject: String,
  pub body: String,
}

pub struct SmtpRequest {
  spec: SmtpSpec,
  message: Message,
  mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpRequest {
  pub fn new(spec: SmtpSpec) -> Result<Self, RequestError> {
    let config = &spec.config;
    if config.host.is_empty() {
      return Err(RequestError::validation("smtp config requires a host"));
    }
    let sender: Mailbox = config
      .sender
      .parse()
      .map_err(|e| RequestError::validation(format!("invalid sender '{}': {e}", config.sender)))?;
    let recipient: Mailbox = spec
      .address
      .parse()
      .map_err(|e| RequestError::validation(format!("invalid address '{}': {e}", spec.address)))?;

    let message = Message::builder()
      .from(sender)
      .to(recipient)
      .subject(spec.subject.clone())
      .header(ContentType::TEXT_PLAIN)
      .body(spec.body.clone())
      .map_err(|e| RequestError::validation(format!("invalid email: {e}")))?;

    let mut transport = if config.disable_tls {
      AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
    } else {
      AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        .map_err(|e| RequestError::configuration(format!("invalid smtp relay '{}': {e}", config.host)))?
    };
    if config.port != 0 {
      transport = transport.port(config.port);
    }
    if !config.username.is_empty() {
      transport = transport.credentials(Credentials::new(config.username.clone(), config.password.clone()));
    }

    Ok(Self {
      mailer: transport.build(),
      message,
      spec,
    })
  }
}

#[derive(Debug)]
pub struct SmtpResponse {
  pub success: bool,
  pub error: Option<String>,
}

impl Response for SmtpResponse {
  fn to_json(&self) -> Value {
    json!({ "data": { "success": self.success } })
  }

  fn log(&self) -> String {
    format!("Success: {}", self.success)
  }

  fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }
}

#[async_trait]
impl Request for SmtpRequest {
  async fn perform(&self) -> Box<dyn Response> {
    match self.mailer.send(self.message.clone()).await {
      Ok(_) => Box::new(SmtpResponse {
        success: true,
        error: None,
      }),
      Err(e) => Box::new(SmtpResponse {
        success: false,
        error: Some(format!("smtp send failed: {e}")),
      }),
    }
  }

  fn log(&self, dev_mode: bool) -> String {
    let mut line = format!("To: {}\n", self.spec.address);
    if dev_mode {
      line.push_str(&self.spec.body);
    }
    line
  }

  fn marshal(&self) -> Result<Vec<u8>, RequestError> {
    let mut spec = self.spec.clone();
    spec.config.password.clear();
    marshal(&spec)
  }
}

pub struct SmtpFactory;

#[async_trait]
impl RequestFactory for SmtpFactory {
  async fn build(&self, ctx: BuildContext<'_>) -> Result<Arc<dyn Request>, RequestError> {
    let spec: SmtpSpec = overlay::resolve(ctx.remote_endpoint, ctx.payload)?;
    Ok(Arc::new(SmtpRequest::new(spec)?))
  }
}
