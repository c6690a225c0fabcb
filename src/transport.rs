use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::{config::SmtpConfig, dto::EmailRequest};

const DEFAULT_ATTACHMENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("attachment '{name}' is not valid base64: {source}")]
    AttachmentEncoding {
        name: String,
        source: base64::DecodeError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid email address format: {0}")]
    AddressFormat(#[from] lettre::address::AddressError),

    #[error("Invalid sender address '{address}': {source}")]
    SenderAddress {
        address: String,
        source: lettre::address::AddressError,
    },

    #[error("Invalid attachment content type '{value}': {reason}")]
    ContentType { value: String, reason: String },

    #[error("Failed to build email message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("Failed to prepare TLS for SMTP relay: {0}")]
    Tls(lettre::transport::smtp::Error),

    #[error("SMTP connection verification failed: {0}")]
    Verify(lettre::transport::smtp::Error),

    #[error("SMTP connection verification failed: relay did not accept the connection check")]
    Unverified,

    #[error("SMTP transport error: {0}")]
    Send(lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingAttachment {
    pub filename: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

/// Message data handed to a [`Relay`]. Exactly one of `text` and `html` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub from: String,
    pub to: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
    pub attachments: Vec<OutgoingAttachment>,
}

impl OutgoingMessage {
    pub fn build(config: &SmtpConfig, request: &EmailRequest) -> Result<Self, MessageError> {
        let attachments = request
            .attachments
            .iter()
            .map(|attachment| {
                let encoded: String = attachment.content.split_ascii_whitespace().collect();
                let content = STANDARD.decode(encoded).map_err(|source| {
                    MessageError::AttachmentEncoding {
                        name: attachment.name.clone(),
                        source,
                    }
                })?;
                Ok(OutgoingAttachment {
                    filename: attachment.name.clone(),
                    content,
                    content_type: attachment.mime_type.clone(),
                })
            })
            .collect::<Result<Vec<_>, MessageError>>()?;

        let (text, html) = if request.is_html {
            (None, Some(request.body.clone()))
        } else {
            (Some(request.body.clone()), None)
        };

        Ok(Self {
            from: config.from.clone(),
            to: request.to.clone(),
            cc: request.cc.clone(),
            bcc: request.bcc.clone(),
            subject: request.subject.clone(),
            text,
            html,
            attachments,
        })
    }

    fn into_lettre(self) -> Result<Message, TransportError> {
        let from = self
            .from
            .parse::<Mailbox>()
            .map_err(|source| TransportError::SenderAddress {
                address: self.from.clone(),
                source,
            })?;

        let mut builder = Message::builder()
            .from(from)
            .to(self.to.parse::<Mailbox>()?)
            .subject(self.subject);

        if let Some(cc) = self.cc {
            builder = builder.cc(cc.parse::<Mailbox>()?);
        }
        if let Some(bcc) = self.bcc {
            builder = builder.bcc(bcc.parse::<Mailbox>()?);
        }

        let body = match self.html {
            Some(html) => SinglePart::html(html),
            None => SinglePart::plain(self.text.unwrap_or_default()),
        };

        if self.attachments.is_empty() {
            return Ok(builder.singlepart(body)?);
        }

        let mut parts = MultiPart::mixed().singlepart(body);
        for attachment in self.attachments {
            let value = attachment
                .content_type
                .unwrap_or_else(|| DEFAULT_ATTACHMENT_TYPE.to_string());
            let content_type =
                ContentType::parse(&value).map_err(|e| TransportError::ContentType {
                    reason: e.to_string(),
                    value,
                })?;
            parts = parts.singlepart(
                Attachment::new(attachment.filename).body(attachment.content, content_type),
            );
        }

        Ok(builder.multipart(parts)?)
    }
}

/// Delivers one message. Returns the relay's message id when it reports one.
#[async_trait]
pub trait Relay: Send + Sync + 'static {
    async fn dispatch(
        &self,
        config: &SmtpConfig,
        message: OutgoingMessage,
    ) -> Result<Option<String>, TransportError>;
}

/// lettre-backed relay. Builds a fresh transport for every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmtpRelay;

impl SmtpRelay {
    fn transport(
        config: &SmtpConfig,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let parameters = TlsParameters::new(config.host.clone()).map_err(TransportError::Tls)?;
        // secure means TLS from the first byte; otherwise upgrade with STARTTLS when offered
        let tls = if config.secure {
            Tls::Wrapper(parameters)
        } else {
            Tls::Opportunistic(parameters)
        };

        let creds = Credentials::new(config.user.clone(), config.pass.clone());

        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
                .tls(tls)
                .credentials(creds)
                .build(),
        )
    }
}

#[async_trait]
impl Relay for SmtpRelay {
    async fn dispatch(
        &self,
        config: &SmtpConfig,
        message: OutgoingMessage,
    ) -> Result<Option<String>, TransportError> {
        let email = message.into_lettre()?;
        let mailer = Self::transport(config)?;

        tracing::debug!("Verifying SMTP relay {}:{}", config.host, config.port);
        if !mailer.test_connection().await.map_err(TransportError::Verify)? {
            return Err(TransportError::Unverified);
        }

        let response = mailer.send(email).await.map_err(TransportError::Send)?;

        Ok(provider_message_id(response.message()))
    }
}

/// Pulls the id out of a `250 ... queued as <id>` reply.
fn provider_message_id<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<String> {
    lines.into_iter().find_map(|line| {
        let (_, rest) = line.split_once("queued as ")?;
        let id = rest
            .split_whitespace()
            .next()?
            .trim_matches(|c: char| !c.is_ascii_alphanumeric());
        (!id.is_empty()).then(|| id.to_string())
    })
}
