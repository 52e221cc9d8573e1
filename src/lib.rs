#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! # Background Removal API
//!
//! An HTTP service that removes the background from uploaded images, backed by
//! `ISNet`-style segmentation models running on ONNX Runtime or Tract.
//!
//! ## Features
//!
//! - **HTTP API**: `POST /remove-background` takes a multipart upload and returns a PNG
//!   with a transparent background; `GET /` and `GET /health` for liveness
//! - **Multiple Backends**: ONNX Runtime (GPU acceleration) and Tract (Pure Rust)
//! - **Hardware Acceleration**: CUDA, `CoreML`, and CPU execution providers
//! - **Model Management**: Automatic downloading and caching of models from `HuggingFace`
//! - **Browser Frontends**: Configurable CORS origins with credentials
//!
//! ## Library Usage
//!
//! The router can be embedded in another axum application with any
//! [`BackgroundRemover`] implementation:
//!
//! ```rust,no_run
//! use bg_remover_api::{
//!     api, BackgroundRemovalProcessor, ModelBackgroundRemover, RemovalConfig, ServerConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = ServerConfig::builder()
//!     .port(8080)
//!     .removal(RemovalConfig::default())
//!     .build()?;
//!
//! let remover = ModelBackgroundRemover::new(BackgroundRemovalProcessor::new(
//!     config.removal.clone(),
//! )?);
//! remover.warm_up().await?;
//!
//! let app = api::router(Arc::new(remover), &config)?;
//! let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): Server binary, argument parsing and log subscriber setup
//! - `webp-support` (default): WebP uploads
//! - `tracing-json`, `tracing-files`: JSON log lines and file output for the binary

pub mod api;
pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod inference;
pub mod models;
pub mod processor;
pub mod remover;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use backends::*;
pub use cache::ModelCache;
pub use config::{
    BackendType, CorsConfig, ExecutionProvider, RemovalConfig, ServerConfig,
};
pub use download::{validate_model_url, ModelDownloader};
pub use error::{BgRemovalError, Result};
pub use inference::InferenceBackend;
pub use models::{ModelManager, ModelSource, ModelSpec};
pub use processor::{BackendFactory, BackgroundRemovalProcessor, DefaultBackendFactory};
pub use remover::{BackgroundRemover, ModelBackgroundRemover};
pub use types::{ProcessingTimings, RemovalResult, SegmentationMask};
pub use utils::{ImagePreprocessor, ModelSpecParser};

#[cfg(feature = "cli")]
pub use tracing_config::{TracingConfig, TracingFormat, TracingOutput};
