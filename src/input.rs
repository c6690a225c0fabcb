//! Turns whatever the caller handed us into an [`EmailRequest`].
//!
//! Callers send one argument that may be an object, an object wrapped in a
//! one-element array, an array whose first element is a JSON-encoded object,
//! or plain positional values `(to, subject, body)`.

use regex::Regex;
use serde_json::{Map, Value};

use std::sync::LazyLock;

use crate::dto::{AttachmentInput, EmailRequest, PROVIDER};

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("address pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unsupported input shape")]
    UnsupportedShape,

    #[error("recipient required")]
    MissingRecipient,

    #[error("subject required")]
    MissingSubject,

    #[error("message required")]
    MissingBody,

    #[error("invalid recipient address")]
    InvalidRecipient,

    #[error("invalid CC address")]
    InvalidCc,

    #[error("invalid BCC address")]
    InvalidBcc,

    #[error("unsupported provider '{0}', only 'smtp' is available")]
    UnsupportedProvider(String),
}

/// The caller's argument after shape detection, before any field is read.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    Fields(Map<String, Value>),
    Positional(Vec<Value>),
}

impl RawInput {
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(map) => return Ok(Self::Fields(map)),
            _ => return Err(ValidationError::UnsupportedShape),
        };

        let encoded = match items.first() {
            Some(Value::String(first)) => Some(serde_json::from_str::<Value>(first)),
            _ => None,
        };

        match encoded {
            Some(Ok(Value::Object(map))) => return Ok(Self::Fields(map)),
            Some(Ok(_) | Err(_)) => {
                tracing::debug!("First argument is not a JSON object, reading it positionally");
                return Ok(Self::Positional(items));
            }
            None => {}
        }

        match <[Value; 1]>::try_from(items) {
            Ok([Value::Object(map)]) => Ok(Self::Fields(map)),
            _ => Err(ValidationError::UnsupportedShape),
        }
    }

    fn into_fields(self) -> Map<String, Value> {
        match self {
            Self::Fields(map) => map,
            Self::Positional(items) => ["to", "subject", "body"]
                .into_iter()
                .zip(items)
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        }
    }
}

/// Shape detection followed by field validation.
pub fn normalize(input: Value) -> Result<EmailRequest, ValidationError> {
    EmailRequest::try_from(RawInput::from_value(input)?)
}

impl TryFrom<RawInput> for EmailRequest {
    type Error = ValidationError;

    fn try_from(raw: RawInput) -> Result<Self, Self::Error> {
        let fields = raw.into_fields();

        let to = text(&fields, &["to"]).ok_or(ValidationError::MissingRecipient)?;
        let subject = text(&fields, &["subject"]).ok_or(ValidationError::MissingSubject)?;
        let body = text(&fields, &["body"]).ok_or(ValidationError::MissingBody)?;

        if !is_address(&to) {
            return Err(ValidationError::InvalidRecipient);
        }

        let cc = text(&fields, &["cc"]);
        if cc.as_deref().is_some_and(|cc| !is_address(cc)) {
            return Err(ValidationError::InvalidCc);
        }

        let bcc = text(&fields, &["bcc"]);
        if bcc.as_deref().is_some_and(|bcc| !is_address(bcc)) {
            return Err(ValidationError::InvalidBcc);
        }

        if let Some(provider) = text(&fields, &["provider"])
            && !provider.eq_ignore_ascii_case(PROVIDER)
        {
            return Err(ValidationError::UnsupportedProvider(provider));
        }

        let is_html = match pick(&fields, &["isHtml", "html"]) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(flag)) => flag.trim().eq_ignore_ascii_case("true"),
            _ => false,
        };

        Ok(Self {
            to,
            subject,
            body,
            cc,
            bcc,
            is_html,
            attachments: attachments(fields.get("attachments")),
        })
    }
}

pub fn is_address(candidate: &str) -> bool {
    ADDRESS.is_match(candidate)
}

fn pick<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| !value.is_null())
}

/// A field counts as present when it is a non-empty string or a number.
fn text(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match pick(fields, keys)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn attachments(raw: Option<&Value>) -> Vec<AttachmentInput> {
    let entries = match raw {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(items)) => items.iter().collect::<Vec<_>>(),
        Some(single) => vec![single],
    };

    entries
        .into_iter()
        .filter_map(|entry| {
            let Value::Object(entry) = entry else {
                tracing::warn!("Dropping attachment entry that is not an object");
                return None;
            };
            let attachment = AttachmentInput {
                name: text(entry, &["name", "filename"]).unwrap_or_default(),
                content: text(entry, &["content", "data"]).unwrap_or_default(),
                mime_type: text(entry, &["mimeType", "contentType"]),
            };
            if attachment.content.trim().is_empty() {
                tracing::debug!("Dropping attachment '{}' with empty content", attachment.name);
                return None;
            }
            Some(attachment)
        })
        .collect()
}
