//! Cache directory management for downloaded models
//!
//! Downloaded models live in an XDG-compliant directory, one subdirectory per
//! model id, in the `HuggingFace` repository layout:
//!
//! ```text
//! <cache>/models/imgly--isnet-general-onnx/
//!     config.json
//!     preprocessor_config.json
//!     onnx/model.onnx
//!     onnx/model_fp16.onnx
//! ```

use crate::error::{BgRemovalError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "BG_REMOVER_CACHE_DIR";

const HUGGINGFACE_PREFIX: &str = "https://huggingface.co/";

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the default cache, creating it if needed
    ///
    /// Location:
    /// - `$BG_REMOVER_CACHE_DIR/models/` when the variable is set
    /// - Linux/macOS: `~/.cache/bg-remover-api/models/`
    /// - Windows: `%LOCALAPPDATA%/bg-remover-api/models/`
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn new() -> Result<Self> {
        let root = match std::env::var_os(CACHE_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::cache_dir()
                .ok_or_else(|| {
                    BgRemovalError::invalid_config(format!(
                        "Failed to determine cache directory. Set {CACHE_DIR_ENV}."
                    ))
                })?
                .join("bg-remover-api"),
        };
        Self::with_dir(root)
    }

    /// Open a cache rooted at `root`, creating `root/models` if needed
    ///
    /// # Errors
    /// - Failed to create the cache directory
    pub fn with_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let cache_dir = root.as_ref().join("models");
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                BgRemovalError::file_io_error("create cache directory", &cache_dir, &e)
            })?;
        }
        Ok(Self { cache_dir })
    }

    /// Open the cache at an optional override, falling back to the default location
    ///
    /// # Errors
    /// - Failed to determine or create the cache directory
    pub fn from_override(root: Option<&Path>) -> Result<Self> {
        match root {
            Some(root) => Self::with_dir(root),
            None => Self::new(),
        }
    }

    /// Directory holding one subdirectory per cached model
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Model downloaded when none is configured
    #[must_use]
    pub fn get_default_model_url() -> &'static str {
        "https://huggingface.co/imgly/isnet-general-onnx"
    }

    /// Generate a filesystem-safe model id from a URL
    ///
    /// ```
    /// use bg_remover_api::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(id, "imgly--isnet-general-onnx");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        if let Some(repo) = url.strip_prefix(HUGGINGFACE_PREFIX) {
            return repo.trim_end_matches('/').replace('/', "--");
        }

        let digest = Sha256::digest(url.as_bytes());
        let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
        format!("url-{hex}")
    }

    /// Path to a model directory (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    /// Whether a complete model is cached under `model_id`
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        !model_id.is_empty() && Self::validate_model_directory(&self.get_model_path(model_id))
    }

    /// A model directory needs its preprocessor config and at least one ONNX variant
    #[must_use]
    pub fn validate_model_directory(model_dir: &Path) -> bool {
        model_dir.join("preprocessor_config.json").is_file()
            && !Self::available_variants(model_dir).is_empty()
    }

    /// Precision variants present in a model directory, fp32 first
    #[must_use]
    pub fn available_variants(model_dir: &Path) -> Vec<String> {
        let onnx_dir = model_dir.join("onnx");
        [("model.onnx", "fp32"), ("model_fp16.onnx", "fp16")]
            .iter()
            .filter(|(file, _)| onnx_dir.join(file).is_file())
            .map(|(_, variant)| (*variant).to_string())
            .collect()
    }
}
