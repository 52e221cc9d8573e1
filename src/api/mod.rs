//! HTTP surface of the service
//!
//! | Route | Method | Response |
//! |---|---|---|
//! | `/` | GET | `{"message": "Background Removal API is running"}` |
//! | `/health` | GET | `{"status": "healthy"}` |
//! | `/remove-background` | POST | PNG attachment `no_bg_image.png` |
//!
//! Failures on the upload route answer with `{"detail": "..."}` and status 400
//! (not an image) or 500 (anything else).

pub mod cors;
pub mod error;
pub mod handlers;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::remover::BackgroundRemover;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use cors::build_cors_layer;
pub use error::ApiError;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub remover: Arc<dyn BackgroundRemover>,
}

/// Assemble the application router
///
/// # Errors
/// - Invalid CORS configuration
pub fn router(remover: Arc<dyn BackgroundRemover>, config: &ServerConfig) -> Result<Router> {
    let cors = build_cors_layer(&config.cors)?;

    Ok(Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(
            "/remove-background",
            post(handlers::remove_background)
                .layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .with_state(AppState { remover })
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}
