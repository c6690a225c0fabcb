use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_macros::debug_handler;
use serde_json::Value;

use std::sync::Arc;

use crate::dto::Envelope;
use crate::service::{EmailService, EmailServiceError};
use crate::transport::{SmtpRelay, TransportError};

pub type SharedService = Arc<EmailService<SmtpRelay>>;

/// Takes the raw body so that unreadable JSON still gets an envelope back.
#[debug_handler]
pub async fn send_email(State(service): State<SharedService>, body: Bytes) -> Response {
    let payload = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!("Rejected email request body: {e}");
            let error = format!("invalid JSON body: {e}");
            return (StatusCode::BAD_REQUEST, Json(Envelope::failure(&error))).into_response();
        }
    };

    match service.send_email(payload).await {
        Ok(summary) => (StatusCode::OK, Json(Envelope::success(summary))).into_response(),
        Err(e) => {
            tracing::error!("Failed to send email: {e}");
            (status_for(&e), Json(Envelope::failure(&e))).into_response()
        }
    }
}

#[debug_handler]
pub async fn health_check() -> Response {
    (StatusCode::OK, "Hello from smtp-dispatch!").into_response()
}

const fn status_for(error: &EmailServiceError) -> StatusCode {
    match error {
        EmailServiceError::Validation(_)
        | EmailServiceError::Message(_)
        | EmailServiceError::Transport(
            TransportError::AddressFormat(_) | TransportError::ContentType { .. },
        ) => StatusCode::BAD_REQUEST,
        EmailServiceError::Config(_)
        | EmailServiceError::Transport(TransportError::SenderAddress { .. }) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        EmailServiceError::Transport(_) => StatusCode::BAD_GATEWAY,
    }
}
