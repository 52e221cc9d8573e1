//! Parsing of `--model` arguments into model specifications

use crate::{
    cache::ModelCache,
    error::{BgRemovalError, Result},
    models::{ModelSource, ModelSpec},
};
use std::path::{Path, PathBuf};

const VALID_VARIANTS: &[&str] = &["fp32", "fp16"];

/// Utility for parsing and validating model specifications
pub struct ModelSpecParser;

impl ModelSpecParser {
    /// Parse `model` or `model:variant`
    ///
    /// An existing path becomes an external model, a URL becomes the cache id
    /// it downloads to, and anything else is taken as a cached model id.
    ///
    /// ```
    /// use bg_remover_api::models::ModelSource;
    /// use bg_remover_api::utils::ModelSpecParser;
    ///
    /// let spec = ModelSpecParser::parse("https://huggingface.co/imgly/isnet-general-onnx");
    /// assert_eq!(spec.source, ModelSource::Downloaded("imgly--isnet-general-onnx".into()));
    ///
    /// let spec = ModelSpecParser::parse("imgly--isnet-general-onnx:fp16");
    /// assert_eq!(spec.variant.as_deref(), Some("fp16"));
    /// ```
    #[must_use]
    pub fn parse(model_arg: &str) -> ModelSpec {
        if Self::is_url(model_arg) {
            return ModelSpec {
                source: ModelSource::Downloaded(ModelCache::url_to_model_id(model_arg)),
                variant: None,
            };
        }

        let (name, variant) = match model_arg.rsplit_once(':') {
            Some((name, variant))
                if !Path::new(model_arg).exists() && VALID_VARIANTS.contains(&variant) =>
            {
                (name, Some(variant.to_string()))
            },
            _ => (model_arg, None),
        };

        let source = if Path::new(name).exists() {
            ModelSource::External(PathBuf::from(name))
        } else {
            ModelSource::Downloaded(name.to_string())
        };
        ModelSpec { source, variant }
    }

    /// URL to fetch when the argument names a remote repository
    #[must_use]
    pub fn download_url(model_arg: &str) -> Option<&str> {
        Self::is_url(model_arg).then_some(model_arg)
    }

    /// # Errors
    /// - External path missing
    /// - Empty or malformed cached model id
    /// - Unknown variant
    pub fn validate(model_spec: &ModelSpec) -> Result<()> {
        match &model_spec.source {
            ModelSource::External(path) => {
                if !path.exists() {
                    return Err(BgRemovalError::invalid_config(format!(
                        "External model path does not exist: {}",
                        path.display()
                    )));
                }
            },
            ModelSource::Downloaded(model_id) => {
                if model_id.is_empty() {
                    return Err(BgRemovalError::invalid_config("Model id cannot be empty"));
                }
                if model_id.starts_with('.')
                    || !model_id
                        .chars()
                        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
                {
                    return Err(BgRemovalError::invalid_config(format!(
                        "Invalid characters in model id: {model_id}"
                    )));
                }
            },
        }

        match model_spec.variant.as_deref() {
            Some(variant) if !VALID_VARIANTS.contains(&variant) => {
                Err(BgRemovalError::invalid_config(format!(
                    "Unknown model variant '{variant}' (expected one of: {})",
                    VALID_VARIANTS.join(", ")
                )))
            },
            _ => Ok(()),
        }
    }

    fn is_url(model_arg: &str) -> bool {
        model_arg.starts_with("https://") || model_arg.starts_with("http://")
    }
}
