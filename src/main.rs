mod config;
mod dto;
mod handler;
mod input;
mod service;
mod transport;

use axum::{
    Router,
    routing::{get, post},
};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use std::{env, process::ExitCode, sync::Arc};

use config::ProcessEnv;
use service::EmailService;
use transport::SmtpRelay;

#[tokio::main]
async fn main() -> ExitCode {
    // Log setup, stdout is reserved for the result envelope
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let service = EmailService::new(SmtpRelay, ProcessEnv);
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        serve(service).await;
        return ExitCode::SUCCESS;
    }

    run_once(&service, args).await
}

/// One-shot mode: the arguments are the invocation, one envelope goes to stdout.
async fn run_once(service: &EmailService<SmtpRelay>, args: Vec<String>) -> ExitCode {
    let input = Value::Array(args.into_iter().map(Value::String).collect());
    let envelope = service.dispatch(input).await;

    match serde_json::to_string(&envelope) {
        Ok(line) => println!("{line}"),
        Err(e) => {
            tracing::error!("Failed to serialize result envelope: {e}");
            return ExitCode::FAILURE;
        }
    }

    if envelope.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn serve(service: EmailService<SmtpRelay>) {
    // Load config
    let cfg = config::load_service_config().expect("failed to load service config file");
    tracing::info!("Successfully loaded service config");

    // Setup router
    let router = Router::new()
        .route("/email", post(handler::send_email))
        .route("/", get(handler::health_check))
        .with_state(Arc::new(service))
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", cfg.bind, cfg.port))
        .await
        .expect("Failed to bind to address");

    match listener.local_addr() {
        Ok(addr) => tracing::info!("smtp-dispatch listening on {}", addr),
        Err(e) => tracing::warn!("Listening, but local address is unavailable: {e}"),
    }

    axum::serve(listener, router)
        .await
        .expect("Failed to start server");
}
