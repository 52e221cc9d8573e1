//! Configuration types for the server and the removal pipeline

use crate::error::{BgRemovalError, Result};
use crate::models::ModelSpec;
use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Origin of the local frontend development server
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// Largest accepted upload, matching the frontend's 10 MB limit plus form overhead
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024 + 64 * 1024;

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon GPU acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Inference engine used to run the segmentation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendType {
    /// ONNX Runtime backend (supports GPU acceleration)
    #[default]
    Onnx,
    /// Tract backend (pure Rust, no external dependencies)
    Tract,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Onnx => write!(f, "onnx"),
            Self::Tract => write!(f, "tract"),
        }
    }
}

/// Parse a `backend:provider` pair such as `onnx:auto` or `tract:cpu`
///
/// A bare backend name selects its default provider.
pub fn parse_backend_provider(value: &str) -> Result<(BackendType, ExecutionProvider)> {
    let normalized = value.trim().to_ascii_lowercase();
    let (backend, provider) = match normalized.split_once(':') {
        Some((backend, provider)) => (backend, Some(provider)),
        None => (normalized.as_str(), None),
    };

    let backend_type = match backend {
        "onnx" => BackendType::Onnx,
        "tract" => BackendType::Tract,
        other => {
            return Err(BgRemovalError::invalid_config(format!(
                "Unknown backend '{other}'. Expected 'onnx' or 'tract'"
            )))
        },
    };

    let execution_provider = match (backend_type, provider) {
        (BackendType::Onnx, None | Some("auto")) => ExecutionProvider::Auto,
        (BackendType::Tract, None | Some("cpu" | "auto")) | (BackendType::Onnx, Some("cpu")) => {
            ExecutionProvider::Cpu
        },
        (BackendType::Onnx, Some("cuda")) => ExecutionProvider::Cuda,
        (BackendType::Onnx, Some("coreml")) => ExecutionProvider::CoreMl,
        (_, Some(other)) => {
            return Err(BgRemovalError::invalid_config(format!(
                "Execution provider '{other}' is not supported by the {backend_type} backend"
            )))
        },
    };

    Ok((backend_type, execution_provider))
}

/// Configuration for the background removal pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Model specification including source and variant
    pub model_spec: ModelSpec,

    /// Inference engine
    pub backend_type: BackendType,

    /// Execution provider for ONNX Runtime
    pub execution_provider: ExecutionProvider,

    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,

    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,

    /// Override for the downloaded-model cache directory
    pub cache_dir: Option<PathBuf>,

    /// Enable debug mode (additional logging)
    pub debug: bool,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            model_spec: ModelSpec::default(),
            backend_type: BackendType::default(),
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
            cache_dir: None,
            debug: false,
        }
    }
}

impl RemovalConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::new()
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - GPU execution provider requested for the Tract backend
    pub fn validate(&self) -> Result<()> {
        if self.backend_type == BackendType::Tract
            && !matches!(
                self.execution_provider,
                ExecutionProvider::Cpu | ExecutionProvider::Auto
            )
        {
            return Err(BgRemovalError::invalid_config(format!(
                "Tract backend only runs on the CPU, got execution provider '{}'",
                self.execution_provider
            )));
        }
        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn model_spec(mut self, model_spec: ModelSpec) -> Self {
        self.config.model_spec = model_spec;
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<RemovalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Cross-origin settings for the HTTP surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Exact origins allowed to call the API
    pub allowed_origins: Vec<String>,
    /// Whether cookies and auth headers may accompany cross-origin requests
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
            allow_credentials: true,
        }
    }
}

impl CorsConfig {
    /// Parse the configured origins into header values
    ///
    /// # Errors
    /// - Empty origin list
    /// - Wildcard origin combined with credentials
    /// - Origin that is not a valid header value
    pub fn origin_header_values(&self) -> Result<Vec<HeaderValue>> {
        if self.allowed_origins.is_empty() {
            return Err(BgRemovalError::invalid_config(
                "At least one allowed CORS origin is required",
            ));
        }

        self.allowed_origins
            .iter()
            .map(|origin| {
                let origin = origin.trim();
                if origin == "*" && self.allow_credentials {
                    return Err(BgRemovalError::invalid_config(
                        "Wildcard CORS origin cannot be combined with credentials",
                    ));
                }
                HeaderValue::from_str(origin).map_err(|e| {
                    BgRemovalError::invalid_config(format!("Invalid CORS origin '{origin}': {e}"))
                })
            })
            .collect()
    }
}

/// Top-level configuration for the HTTP service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// TCP port to bind
    pub port: u16,
    /// Cross-origin settings
    pub cors: CorsConfig,
    /// Largest request body accepted on the upload route
    pub max_upload_bytes: usize,
    /// Removal pipeline settings
    pub removal: RemovalConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors: CorsConfig::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            removal: RemovalConfig::default(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }

    /// `host:port` string handed to the listener (host names are resolved at bind time)
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate every section of the configuration
    ///
    /// # Errors
    /// - Port 0, an empty or whitespace-containing host, an empty upload limit
    /// - Invalid CORS origins
    /// - Invalid removal configuration
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(BgRemovalError::config_value_error("port", self.port, "1-65535"));
        }
        if self.host.trim().is_empty() || self.host.chars().any(char::is_whitespace) {
            return Err(BgRemovalError::invalid_config(format!(
                "Invalid listen host '{}'",
                self.host
            )));
        }
        if self.max_upload_bytes == 0 {
            return Err(BgRemovalError::config_value_error(
                "max_upload_bytes",
                self.max_upload_bytes,
                "greater than 0",
            ));
        }
        self.cors.origin_header_values()?;
        self.removal.validate()
    }
}

/// Builder for `ServerConfig`
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.config.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    #[must_use]
    pub fn allowed_origins(mut self, origins: Vec<String>) -> Self {
        self.config.cors.allowed_origins = origins;
        self
    }

    #[must_use]
    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.config.cors.allow_credentials = allow;
        self
    }

    #[must_use]
    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    #[must_use]
    pub fn removal(mut self, removal: RemovalConfig) -> Self {
        self.config.removal = removal;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ServerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.cors.allowed_origins, vec!["http://localhost:3000"]);
        assert!(config.cors.allow_credentials);
        assert!(config.validate().is_ok());
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
    }

    #[test]
    fn test_server_config_rejects_port_zero() {
        let err = ServerConfig::builder().port(0).build().unwrap_err();
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_server_config_rejects_bad_host() {
        let err = ServerConfig::builder()
            .host("not a host")
            .build()
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::InvalidConfig(_)));
    }

    #[test]
    fn test_cors_config_validation() {
        let empty = CorsConfig {
            allowed_origins: vec![],
            allow_credentials: true,
        };
        assert!(empty.origin_header_values().is_err());

        let wildcard = CorsConfig {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: true,
        };
        assert!(wildcard.origin_header_values().is_err());

        let newline = CorsConfig {
            allowed_origins: vec!["http://bad\norigin".to_string()],
            allow_credentials: false,
        };
        assert!(newline.origin_header_values().is_err());

        let values = CorsConfig::default().origin_header_values().unwrap();
        assert_eq!(values, vec![HeaderValue::from_static("http://localhost:3000")]);
    }

    #[test]
    fn test_parse_backend_provider() {
        assert_eq!(
            parse_backend_provider("onnx:auto").unwrap(),
            (BackendType::Onnx, ExecutionProvider::Auto)
        );
        assert_eq!(
            parse_backend_provider("ONNX:CUDA").unwrap(),
            (BackendType::Onnx, ExecutionProvider::Cuda)
        );
        assert_eq!(
            parse_backend_provider("onnx:coreml").unwrap(),
            (BackendType::Onnx, ExecutionProvider::CoreMl)
        );
        assert_eq!(
            parse_backend_provider("tract").unwrap(),
            (BackendType::Tract, ExecutionProvider::Cpu)
        );
        assert!(parse_backend_provider("tract:cuda").is_err());
        assert!(parse_backend_provider("tensorflow:cpu").is_err());
    }

    #[test]
    fn test_removal_config_rejects_gpu_tract() {
        let result = RemovalConfig::builder()
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cuda)
            .build();
        assert!(result.is_err());

        let config = RemovalConfig::builder()
            .backend_type(BackendType::Tract)
            .execution_provider(ExecutionProvider::Cpu)
            .intra_threads(2)
            .build()
            .unwrap();
        assert_eq!(config.intra_threads, 2);
    }

    #[test]
    fn test_execution_provider_display() {
        assert_eq!(ExecutionProvider::Auto.to_string(), "auto");
        assert_eq!(ExecutionProvider::CoreMl.to_string(), "coreml");
        assert_eq!(BackendType::Tract.to_string(), "tract");
    }
}
