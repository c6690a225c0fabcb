use chrono::Utc;
use serde_json::Value;

use crate::{
    config::{ConfigError, EnvSource, ProcessEnv, SmtpConfig},
    dto::{ConfigEcho, EmailRequest, Envelope, SendReceipt, SendSummary},
    input::{self, ValidationError},
    transport::{MessageError, OutgoingMessage, Relay, TransportError},
};

pub struct EmailService<R, E = ProcessEnv> {
    relay: R,
    env: E,
}

#[derive(Debug, thiserror::Error)]
pub enum EmailServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl<R: Relay, E: EnvSource> EmailService<R, E> {
    pub const fn new(relay: R, env: E) -> Self {
        Self { relay, env }
    }

    /// Runs one invocation end to end. Never fails: errors come back as a
    /// failure envelope.
    pub async fn dispatch(&self, input: Value) -> Envelope {
        match self.send_email(input).await {
            Ok(summary) => Envelope::success(summary),
            Err(e) => {
                tracing::error!("Failed to send email: {e}");
                Envelope::failure(&e)
            }
        }
    }

    pub async fn send_email(&self, input: Value) -> Result<SendSummary, EmailServiceError> {
        let request = input::normalize(input)?;
        let receipt = self.send(&request).await?;

        Ok(SendSummary::new(&request, receipt, Utc::now()))
    }

    async fn send(&self, request: &EmailRequest) -> Result<SendReceipt, EmailServiceError> {
        let config = SmtpConfig::resolve(&self.env)?;
        let message = OutgoingMessage::build(&config, request)?;

        tracing::info!(
            "Sending email to '{}' with subject '{}' via {}:{}",
            request.to,
            request.subject,
            config.host,
            config.port
        );

        let message_id = self
            .relay
            .dispatch(&config, message)
            .await?
            .unwrap_or_else(fallback_message_id);

        tracing::info!("Message to {} sent successfully, id {}", request.to, message_id);

        Ok(SendReceipt {
            message_id,
            config: ConfigEcho::from(&config),
        })
    }
}

/// Local id used when the relay does not report one. Only meant for log correlation.
fn fallback_message_id() -> String {
    format!("email_{}", Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::json;

    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRelay {
        reply: Option<String>,
        fail: bool,
        sent: Mutex<Vec<OutgoingMessage>>,
    }

    impl RecordingRelay {
        fn replying(id: &str) -> Self {
            Self {
                reply: Some(id.to_string()),
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<OutgoingMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Relay for RecordingRelay {
        async fn dispatch(
            &self,
            _config: &SmtpConfig,
            message: OutgoingMessage,
        ) -> Result<Option<String>, TransportError> {
            if self.fail {
                return Err(TransportError::Unverified);
            }
            self.sent.lock().unwrap().push(message);
            Ok(self.reply.clone())
        }
    }

    fn smtp_env() -> HashMap<String, String> {
        [
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USER", "robot@example.com"),
            ("SMTP_PASS", "secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn service(relay: RecordingRelay) -> EmailService<RecordingRelay, HashMap<String, String>> {
        EmailService::new(relay, smtp_env())
    }

    #[tokio::test]
    async fn successful_send_reports_provider_id() {
        let service = service(RecordingRelay::replying("abc123"));

        let envelope = service
            .dispatch(json!({"to": "a@b.com", "subject": "Hi", "body": "Hello"}))
            .await;
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["error"], Value::Null);
        assert_eq!(json["data"]["messageId"], "abc123");
        assert_eq!(json["data"]["attachments"], 0);
        assert_eq!(json["data"]["provider"], "smtp");
        assert_eq!(json["data"]["config"]["host"], "smtp.example.com");
        assert_eq!(json["data"]["config"]["port"], 587);
        let timestamp = json["data"]["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn missing_provider_id_gets_local_fallback() {
        let service = service(RecordingRelay::default());

        let summary = service
            .send_email(json!(["a@b.com", "Hi", "Hello"]))
            .await
            .unwrap();

        assert!(summary.message_id.starts_with("email_"));
        assert!(summary.message_id["email_".len()..].parse::<i64>().is_ok());
    }

    #[tokio::test]
    async fn validation_failures_never_reach_the_relay() {
        let service = service(RecordingRelay::replying("abc123"));

        let cases = [
            (json!({"subject": "Hi", "body": "Hello"}), "recipient required"),
            (json!({"to": "a@b.com", "body": "Hello"}), "subject required"),
            (json!({"to": "a@b.com", "subject": "Hi"}), "message required"),
            (
                json!({"to": "nope", "subject": "Hi", "body": "Hello"}),
                "invalid recipient address",
            ),
            (
                json!({"to": "a@b.com", "cc": "nope", "subject": "Hi", "body": "Hello"}),
                "invalid CC address",
            ),
            (
                json!({"to": "a@b.com", "bcc": "nope", "subject": "Hi", "body": "Hello"}),
                "invalid BCC address",
            ),
        ];

        for (input, expected) in cases {
            let envelope = service.dispatch(input).await;
            assert!(!envelope.success);
            assert!(envelope.data.is_none());
            assert_eq!(envelope.error.as_deref(), Some(expected));
        }

        assert!(service.relay.sent().is_empty());
    }

    #[tokio::test]
    async fn missing_configuration_never_reaches_the_relay() {
        for key in ["SMTP_HOST", "SMTP_USER", "SMTP_PASS"] {
            let mut env = smtp_env();
            env.remove(key);
            let service = EmailService::new(RecordingRelay::replying("abc123"), env);

            let err = service
                .send_email(json!({"to": "a@b.com", "subject": "Hi", "body": "Hello"}))
                .await
                .unwrap_err();

            assert!(matches!(err, EmailServiceError::Config(_)));
            assert!(service.relay.sent().is_empty());
        }
    }

    #[tokio::test]
    async fn body_is_routed_by_html_flag() {
        let service = service(RecordingRelay::replying("id"));

        service
            .send_email(json!({"to": "a@b.com", "subject": "Hi", "body": "plain"}))
            .await
            .unwrap();
        service
            .send_email(json!({
                "to": "a@b.com",
                "subject": "Hi",
                "body": "<p>rich</p>",
                "isHtml": true,
            }))
            .await
            .unwrap();

        let sent = service.relay.sent();
        assert_eq!(sent[0].text.as_deref(), Some("plain"));
        assert_eq!(sent[0].html, None);
        assert_eq!(sent[1].text, None);
        assert_eq!(sent[1].html.as_deref(), Some("<p>rich</p>"));
        assert_eq!(sent[0].from, "robot@example.com");
    }

    #[tokio::test]
    async fn empty_attachments_are_dropped_before_sending() {
        let service = service(RecordingRelay::replying("id"));

        let summary = service
            .send_email(json!({
                "to": "a@b.com",
                "subject": "Hi",
                "body": "Hello",
                "attachments": [
                    {"name": "a.txt", "content": "aGVsbG8="},
                    {"name": "b.txt", "content": ""},
                ],
            }))
            .await
            .unwrap();

        assert_eq!(summary.attachments, 1);
        let sent = service.relay.sent();
        assert_eq!(sent[0].attachments.len(), 1);
        assert_eq!(sent[0].attachments[0].filename, "a.txt");
        assert_eq!(sent[0].attachments[0].content, b"hello");
        assert_eq!(sent[0].attachments[0].content_type, None);
    }

    #[tokio::test]
    async fn transport_failure_becomes_failure_envelope() {
        let service = service(RecordingRelay {
            fail: true,
            ..RecordingRelay::default()
        });

        let envelope = service
            .dispatch(json!({"to": "a@b.com", "subject": "Hi", "body": "Hello"}))
            .await;

        assert!(!envelope.success);
        assert!(
            envelope
                .error
                .unwrap()
                .starts_with("SMTP connection verification failed")
        );
    }
}
