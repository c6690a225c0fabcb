use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::config::SmtpConfig;

pub const PROVIDER: &str = "smtp";

/// A validated request to send one email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub is_html: bool,
    pub attachments: Vec<AttachmentInput>,
}

/// An attachment as supplied by the caller, content still base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentInput {
    pub name: String,
    pub content: String,
    pub mime_type: Option<String>,
}

/// Relay settings echoed back to the caller. The password is never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigEcho {
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub user: String,
}

impl From<&SmtpConfig> for ConfigEcho {
    fn from(config: &SmtpConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            secure: config.secure,
            user: config.user.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub message_id: String,
    pub config: ConfigEcho,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSummary {
    pub to: String,
    pub subject: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub is_html: bool,
    pub attachments: usize,
    pub provider: String,
    pub message_id: String,
    pub config: ConfigEcho,
    pub timestamp: String,
}

impl SendSummary {
    pub fn new(request: &EmailRequest, receipt: SendReceipt, sent_at: DateTime<Utc>) -> Self {
        Self {
            to: request.to.clone(),
            subject: request.subject.clone(),
            cc: request.cc.clone(),
            bcc: request.bcc.clone(),
            is_html: request.is_html,
            attachments: request.attachments.len(),
            provider: PROVIDER.to_string(),
            message_id: receipt.message_id,
            config: receipt.config,
            timestamp: sent_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// The single record emitted per invocation.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub success: bool,
    pub data: Option<SendSummary>,
    pub error: Option<String>,
}

impl Envelope {
    pub const fn success(summary: SendSummary) -> Self {
        Self {
            success: true,
            data: Some(summary),
            error: None,
        }
    }

    pub fn failure(error: &impl std::fmt::Display) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}
