//! HTTP/SSE server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | /health | Health check |
//! | GET | /api/exercises | Exercises with the caller's progress |
//! | GET | /api/exercises/{id} | Visit an exercise (creates the completion) |
//! | POST | /api/chat | Chat turn (SSE, UI message stream) |
//! | POST | /api/save-result | Save a step result |
//! | POST | /api/save-responses | Save structured step answers |
//! | POST | /api/complete-step | Complete a step without a result |
//! | GET | /api/admin/settings | Read prompt templates |
//! | POST | /api/admin/settings | Update a prompt template |
//! | POST | /api/admin/settings/preview | Render a template against sample data |
//! | GET | /api/admin/users | List users |
//! | GET | /api/admin/users/{id}/completions | A user's completions |

mod auth;
mod handlers;
pub mod stream;
pub mod types;

pub use handlers::AppState;
pub use types::{ErrorResponse, HealthResponse};

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::llm::TextCompletion;
use crate::settings::NobleSettings;
use crate::store::Repository;

/// Start the HTTP server.
///
/// Returns the bound address (useful when the configured port is 0) and a
/// token that shuts the server down gracefully when cancelled.
pub async fn start_server(
    settings: &NobleSettings,
    repo: Arc<dyn Repository>,
    llm: Arc<dyn TextCompletion>,
) -> anyhow::Result<(SocketAddr, CancellationToken)> {
    let (state, shutdown_token) = AppState::new(repo, llm, settings);
    let app = create_router(state);

    let host: IpAddr = settings
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server host '{}'", settings.server.host))?;
    let listener = TcpListener::bind(SocketAddr::new(host, settings.server.port)).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("HTTP server listening on {}", actual_addr);

    let server_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_token))
}

/// Create the router with all routes configured.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/exercises", get(handlers::list_exercises))
        .route("/api/exercises/{exercise_id}", get(handlers::get_exercise))
        .route("/api/chat", post(handlers::chat))
        .route("/api/save-result", post(handlers::save_result))
        .route("/api/save-responses", post(handlers::save_responses))
        .route("/api/complete-step", post(handlers::complete_step))
        .route(
            "/api/admin/settings",
            get(handlers::get_settings).post(handlers::update_settings),
        )
        .route("/api/admin/settings/preview", post(handlers::preview_settings))
        .route("/api/admin/users", get(handlers::list_users))
        .route(
            "/api/admin/users/{user_id}/completions",
            get(handlers::user_completions),
        )
        .fallback(handlers::not_found)
        .with_state(state)
}
