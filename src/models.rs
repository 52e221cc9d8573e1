//! Model resolution: where the ONNX weights live and how inputs are prepared for them

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Model source specification
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ModelSource {
    /// Model directory (`HuggingFace` layout) or bare `.onnx` file on disk
    External(PathBuf),
    /// Downloaded model in the cache, by model id
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => format!(
                "external:{}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            ModelSource::Downloaded(model_id) => format!("cached:{model_id}"),
        }
    }
}

/// Complete model specification including source and optional variant
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(ModelCache::url_to_model_id(
                ModelCache::get_default_model_url(),
            )),
            variant: None,
        }
    }
}

/// Input geometry and normalization expected by a model
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Square model input size as `[height, width]`
    pub target_size: [u32; 2],
    /// Per-channel mean in the 0-1 range
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation in the 0-1 range
    pub normalization_std: [f32; 3],
}

impl Default for PreprocessingConfig {
    /// `ISNet` defaults, used for bare `.onnx` files without a preprocessor config
    fn default() -> Self {
        Self {
            target_size: [1024, 1024],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }
}

/// Model information and metadata
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub precision: String,
    pub size_bytes: usize,
    pub input_shape: (usize, usize, usize, usize), // NCHW format
    pub output_shape: (usize, usize, usize, usize),
}

/// Model provider trait for loading models
pub trait ModelProvider: std::fmt::Debug + Send + Sync {
    /// Load model data as bytes
    ///
    /// # Errors
    /// - Model file not found or unreadable
    fn load_model_data(&self) -> Result<Vec<u8>>;

    /// Get model information
    ///
    /// # Errors
    /// - Model file metadata unavailable
    fn get_model_info(&self) -> Result<ModelInfo>;

    /// Get preprocessing configuration
    ///
    /// # Errors
    /// - Invalid preprocessor configuration
    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig>;

    /// Path of the ONNX file that will be loaded
    fn get_model_path(&self) -> PathBuf;
}

/// Resolved location of an ONNX file plus the metadata found next to it
#[derive(Debug, Clone)]
struct ResolvedModel {
    name: String,
    model_file: PathBuf,
    variant: String,
    preprocessing: PreprocessingConfig,
}

impl ResolvedModel {
    /// Resolve a `HuggingFace`-layout directory and pick the requested variant
    fn from_directory(model_dir: &Path, variant: Option<&str>) -> Result<Self> {
        let preprocessor_path = model_dir.join("preprocessor_config.json");
        let preprocessing = read_preprocessor_config(&preprocessor_path)?;

        let available = ModelCache::available_variants(model_dir);
        let variant = match variant {
            Some(requested) if available.iter().any(|v| v == requested) => requested.to_string(),
            Some(requested) => {
                return Err(BgRemovalError::model(format!(
                    "Variant '{requested}' not found in '{}'. Available: [{}]",
                    model_dir.display(),
                    available.join(", ")
                )))
            },
            None => available.into_iter().next().ok_or_else(|| {
                BgRemovalError::model(format!(
                    "No ONNX model found under '{}'",
                    model_dir.join("onnx").display()
                ))
            })?,
        };

        let file_name = if variant == "fp16" {
            "model_fp16.onnx"
        } else {
            "model.onnx"
        };

        Ok(Self {
            name: model_dir
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned(),
            model_file: model_dir.join("onnx").join(file_name),
            variant,
            preprocessing,
        })
    }

    /// Resolve a single `.onnx` file, reading a sibling preprocessor config when present
    fn from_file(model_file: &Path, variant: Option<&str>) -> Result<Self> {
        let sibling_config = model_file.with_file_name("preprocessor_config.json");
        let preprocessing = if sibling_config.is_file() {
            read_preprocessor_config(&sibling_config)?
        } else {
            PreprocessingConfig::default()
        };

        Ok(Self {
            name: model_file
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned(),
            model_file: model_file.to_path_buf(),
            variant: variant.unwrap_or("fp32").to_string(),
            preprocessing,
        })
    }

    fn model_info(&self) -> Result<ModelInfo> {
        let metadata = fs::metadata(&self.model_file)
            .map_err(|e| BgRemovalError::file_io_error("inspect model", &self.model_file, &e))?;
        let [height, width] = self.preprocessing.target_size;

        Ok(ModelInfo {
            name: self.name.clone(),
            precision: self.variant.clone(),
            size_bytes: usize::try_from(metadata.len()).unwrap_or(usize::MAX),
            input_shape: (1, 3, height as usize, width as usize),
            output_shape: (1, 1, height as usize, width as usize),
        })
    }

    fn load(&self) -> Result<Vec<u8>> {
        fs::read(&self.model_file)
            .map_err(|e| BgRemovalError::file_io_error("read model", &self.model_file, &e))
    }
}

/// Model on the local filesystem, either a model directory or a single `.onnx` file
#[derive(Debug)]
pub struct ExternalModelProvider {
    resolved: ResolvedModel,
}

impl ExternalModelProvider {
    /// # Errors
    /// - Path does not exist
    /// - Directory without a preprocessor config or ONNX variant
    /// - Requested variant not available
    pub fn new<P: AsRef<Path>>(model_path: P, variant: Option<&str>) -> Result<Self> {
        let model_path = model_path.as_ref();
        let resolved = if model_path.is_dir() {
            ResolvedModel::from_directory(model_path, variant)?
        } else if model_path.is_file() {
            ResolvedModel::from_file(model_path, variant)?
        } else {
            return Err(BgRemovalError::model(format!(
                "Model path '{}' does not exist",
                model_path.display()
            )));
        };
        Ok(Self { resolved })
    }
}

impl ModelProvider for ExternalModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        self.resolved.load()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.resolved.model_info()
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.resolved.preprocessing.clone())
    }

    fn get_model_path(&self) -> PathBuf {
        self.resolved.model_file.clone()
    }
}

/// Model previously downloaded into the cache
#[derive(Debug)]
pub struct DownloadedModelProvider {
    model_id: String,
    resolved: ResolvedModel,
}

impl DownloadedModelProvider {
    /// # Errors
    /// - Model id not present in the cache
    /// - Requested variant not available
    pub fn new(model_id: &str, variant: Option<&str>, cache: &ModelCache) -> Result<Self> {
        if !cache.is_model_cached(model_id) {
            return Err(BgRemovalError::model(format!(
                "Model '{model_id}' is not in the cache at '{}'. Download it first.",
                cache.cache_dir().display()
            )));
        }

        let resolved = ResolvedModel::from_directory(&cache.get_model_path(model_id), variant)?;
        Ok(Self {
            model_id: model_id.to_string(),
            resolved,
        })
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl ModelProvider for DownloadedModelProvider {
    fn load_model_data(&self) -> Result<Vec<u8>> {
        self.resolved.load()
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        self.resolved.model_info()
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(self.resolved.preprocessing.clone())
    }

    fn get_model_path(&self) -> PathBuf {
        self.resolved.model_file.clone()
    }
}

/// Model manager for handling different model sources
#[derive(Debug)]
pub struct ModelManager {
    provider: Box<dyn ModelProvider>,
}

impl ModelManager {
    /// Resolve a model specification against the given cache
    ///
    /// # Errors
    /// - External path missing or incomplete
    /// - Downloaded model not cached
    /// - Requested variant unavailable
    pub fn from_spec(spec: &ModelSpec, cache: &ModelCache) -> Result<Self> {
        let variant = spec.variant.as_deref();
        let provider: Box<dyn ModelProvider> = match &spec.source {
            ModelSource::External(path) => Box::new(ExternalModelProvider::new(path, variant)?),
            ModelSource::Downloaded(model_id) => {
                Box::new(DownloadedModelProvider::new(model_id, variant, cache)?)
            },
        };
        Ok(Self { provider })
    }

    /// Wrap an already constructed provider
    #[must_use]
    pub fn with_provider(provider: Box<dyn ModelProvider>) -> Self {
        Self { provider }
    }

    /// # Errors
    /// - Model file unreadable
    pub fn load_model(&self) -> Result<Vec<u8>> {
        self.provider.load_model_data()
    }

    /// # Errors
    /// - Model file metadata unavailable
    pub fn get_info(&self) -> Result<ModelInfo> {
        self.provider.get_model_info()
    }

    /// # Errors
    /// - Invalid preprocessor configuration
    pub fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        self.provider.get_preprocessing_config()
    }

    #[must_use]
    pub fn get_model_path(&self) -> PathBuf {
        self.provider.get_model_path()
    }
}

/// Read `preprocessor_config.json` in the `HuggingFace` image-processor format
fn read_preprocessor_config(path: &Path) -> Result<PreprocessingConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| BgRemovalError::file_io_error("read preprocessor config", path, &e))?;
    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        BgRemovalError::model(format!(
            "Invalid JSON in '{}': {e}",
            path.display()
        ))
    })?;
    parse_preprocessor_config(&value)
}

/// Parse the size and normalization fields of a `HuggingFace` preprocessor config
///
/// Mean and std are given in the 0-255 range and converted to 0-1.
pub fn parse_preprocessor_config(preprocessor: &serde_json::Value) -> Result<PreprocessingConfig> {
    Ok(PreprocessingConfig {
        target_size: parse_image_size(preprocessor)?,
        normalization_mean: parse_channel_triplet(preprocessor, "image_mean")?,
        normalization_std: parse_channel_triplet(preprocessor, "image_std")?,
    })
}

fn parse_image_size(preprocessor: &serde_json::Value) -> Result<[u32; 2]> {
    let size = preprocessor
        .get("size")
        .ok_or_else(|| BgRemovalError::model("Missing size in preprocessor config"))?;

    let dimension = |key: &str| -> Result<u32> {
        let value = size
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| {
                BgRemovalError::model(format!("Missing or invalid {key} in size config"))
            })?;
        if value == 0 {
            return Err(BgRemovalError::model(format!("Size {key} must be positive")));
        }
        u32::try_from(value)
            .map_err(|_| BgRemovalError::model(format!("Size {key} too large for u32")))
    };

    let height = dimension("height")?;
    let width = dimension("width")?;
    if height != width {
        return Err(BgRemovalError::model(format!(
            "Only square model inputs are supported, got {width}x{height}"
        )));
    }
    Ok([height, width])
}

fn parse_channel_triplet(preprocessor: &serde_json::Value, key: &str) -> Result<[f32; 3]> {
    let values = preprocessor
        .get(key)
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| {
            BgRemovalError::model(format!("Missing or invalid {key} in preprocessor config"))
        })?;

    let mut triplet = [0.0_f32; 3];
    for (slot, value) in triplet.iter_mut().zip(values.iter()) {
        let raw = value.as_f64().ok_or_else(|| {
            BgRemovalError::model(format!("{key} must contain numbers"))
        })?;
        *slot = (raw / 255.0) as f32;
    }
    if values.len() < 3 {
        return Err(BgRemovalError::model(format!(
            "{key} must have at least 3 values"
        )));
    }
    if key == "image_std" && triplet.iter().any(|std| *std <= 0.0) {
        return Err(BgRemovalError::model("image_std values must be positive"));
    }
    Ok(triplet)
}
