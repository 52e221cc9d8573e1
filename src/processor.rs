//! Background removal pipeline
//!
//! [`BackgroundRemovalProcessor`] owns one inference backend and turns encoded
//! image bytes into a transparent-background PNG:
//!
//! 1. decode and letterbox the image into the model input tensor
//! 2. run the segmentation model
//! 3. map the predicted mask back onto the original pixels
//! 4. use the mask as alpha, clearing fully transparent pixels

use crate::{
    cache::ModelCache,
    config::{BackendType, RemovalConfig},
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::ModelManager,
    types::{ProcessingTimings, RemovalResult, SegmentationMask},
    utils::{ImagePreprocessor, Letterbox},
};
use image::{DynamicImage, Rgba, RgbaImage};
use instant::{Duration, Instant};
use log::{debug, info};
use ndarray::Array4;
use tracing::{instrument, span, Level};

/// Factory for creating inference backends
pub trait BackendFactory: Send + Sync {
    /// # Errors
    /// - Backend type not compiled in
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>>;

    fn available_backends(&self) -> Vec<BackendType>;
}

/// Creates the backends enabled through cargo features
#[derive(Debug, Default)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(
        &self,
        backend_type: BackendType,
        model_manager: ModelManager,
    ) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::with_model_manager(
                model_manager,
            ))),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::with_model_manager(
                model_manager,
            ))),
            #[allow(unreachable_patterns)]
            other => {
                drop(model_manager);
                Err(BgRemovalError::invalid_config(format!(
                    "The {other} backend is not enabled in this build"
                )))
            },
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

/// Background removal processor holding a single model session
pub struct BackgroundRemovalProcessor {
    config: RemovalConfig,
    backend_factory: Box<dyn BackendFactory>,
    backend: Option<Box<dyn InferenceBackend>>,
}

impl std::fmt::Debug for BackgroundRemovalProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemovalProcessor")
            .field("config", &self.config)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl BackgroundRemovalProcessor {
    /// Create a processor using the feature-enabled backends
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn new(config: RemovalConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultBackendFactory))
    }

    /// # Errors
    /// - Invalid configuration
    pub fn with_factory(
        config: RemovalConfig,
        backend_factory: Box<dyn BackendFactory>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend_factory,
            backend: None,
        })
    }

    /// Create a processor around an already constructed backend
    ///
    /// # Errors
    /// - Invalid configuration
    pub fn with_backend(config: RemovalConfig, backend: Box<dyn InferenceBackend>) -> Result<Self> {
        let mut processor = Self::new(config)?;
        processor.backend = Some(backend);
        Ok(processor)
    }

    /// Resolve the model and load the inference session
    ///
    /// Returns the model load time, or `None` when already initialized.
    ///
    /// # Errors
    /// - Model not found or not cached
    /// - Backend creation or session initialization failures
    pub fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.is_initialized() {
            return Ok(None);
        }

        info!(
            "Initializing {} backend with {}",
            self.config.backend_type,
            self.config.model_spec.source.display_name()
        );
        debug!("Execution provider: {}", self.config.execution_provider);

        let mut backend = match self.backend.take() {
            Some(backend) => backend,
            None => {
                let cache = ModelCache::from_override(self.config.cache_dir.as_deref())?;
                let model_manager = ModelManager::from_spec(&self.config.model_spec, &cache)?;
                self.backend_factory
                    .create_backend(self.config.backend_type, model_manager)?
            },
        };

        let load_time = backend.initialize(&self.config);
        // Keep the backend so a failed load can be retried
        self.backend = Some(backend);
        let load_time = load_time?;

        if let Some(elapsed) = load_time {
            info!("Processor ready, model loaded in {}ms", elapsed.as_millis());
        }
        Ok(load_time)
    }

    /// Drop the loaded backend so the next request builds and loads a fresh one
    pub fn reset(&mut self) {
        if self.backend.take().is_some() {
            info!("Backend reset, model will be reloaded on next use");
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.backend
            .as_ref()
            .is_some_and(|backend| backend.is_initialized())
    }

    #[must_use]
    pub fn config(&self) -> &RemovalConfig {
        &self.config
    }

    #[must_use]
    pub fn available_backends(&self) -> Vec<BackendType> {
        self.backend_factory.available_backends()
    }

    /// Decode image bytes and remove their background
    ///
    /// # Errors
    /// - Bytes are not a decodable image
    /// - Initialization, inference or mask generation failures
    #[instrument(skip(self, image_bytes), fields(input_bytes = image_bytes.len()))]
    pub fn process_bytes(&mut self, image_bytes: &[u8]) -> Result<RemovalResult> {
        let decode_start = Instant::now();
        let image = image::load_from_memory(image_bytes)
            .map_err(|e| BgRemovalError::processing(format!("Failed to decode image: {e}")))?;
        let decode_ms = decode_start.elapsed().as_millis() as u64;

        let mut result = self.process_image(&image)?;
        result.timings.image_decode_ms = decode_ms;
        result.timings.total_ms += decode_ms;
        Ok(result)
    }

    /// Remove the background of a decoded image
    ///
    /// # Errors
    /// - Initialization, inference or mask generation failures
    #[instrument(
        skip(self, image),
        fields(
            backend = %self.config.backend_type,
            dimensions = %format!("{}x{}", image.width(), image.height())
        )
    )]
    pub fn process_image(&mut self, image: &DynamicImage) -> Result<RemovalResult> {
        self.initialize()?;

        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();
        let original_dimensions = (image.width(), image.height());

        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| BgRemovalError::internal("Backend not initialized"))?;

        let (input_tensor, letterbox) = {
            let _span = span!(Level::DEBUG, "preprocessing").entered();
            let start = Instant::now();
            let preprocessing_config = backend.get_preprocessing_config()?;
            let prepared = ImagePreprocessor::preprocess_for_inference(image, &preprocessing_config)?;
            timings.preprocessing_ms = start.elapsed().as_millis() as u64;
            prepared
        };

        let output_tensor = {
            let _span = span!(Level::DEBUG, "inference").entered();
            let start = Instant::now();
            let output = backend.infer(&input_tensor)?;
            timings.inference_ms = start.elapsed().as_millis() as u64;
            output
        };

        let (mask, cutout) = {
            let _span = span!(Level::DEBUG, "postprocessing").entered();
            let start = Instant::now();
            let mask = Self::tensor_to_mask(&output_tensor, &letterbox, original_dimensions)?;
            let cutout = Self::apply_background_removal(image, &mask);
            timings.postprocessing_ms = start.elapsed().as_millis() as u64;
            (mask, cutout)
        };

        timings.total_ms = total_start.elapsed().as_millis() as u64;
        debug!(
            "Processed {}x{} image, foreground {:.1}%",
            original_dimensions.0,
            original_dimensions.1,
            mask.foreground_ratio() * 100.0
        );

        Ok(RemovalResult::new(cutout, mask, original_dimensions, timings))
    }

    /// Map a `1x1xHxW` model output back onto the original image grid
    ///
    /// Values are clamped to 0-1 and scaled to 0-255. The output may be at a
    /// different resolution than the model input; coordinates are rescaled.
    ///
    /// # Errors
    /// - Output tensor is not a single-channel, single-image mask
    pub fn tensor_to_mask(
        tensor: &Array4<f32>,
        letterbox: &Letterbox,
        original_dimensions: (u32, u32),
    ) -> Result<SegmentationMask> {
        let (batch, channels, mask_height, mask_width) = tensor.dim();
        if batch != 1 || channels != 1 || mask_height == 0 || mask_width == 0 {
            return Err(BgRemovalError::processing(format!(
                "Invalid output tensor shape {:?}, expected [1, 1, H, W]",
                tensor.shape()
            )));
        }

        let target = letterbox.target_size as usize;
        let rescale = |coord: usize, extent: usize| -> usize {
            if extent == target {
                coord
            } else {
                (coord * extent / target).min(extent - 1)
            }
        };

        let (width, height) = original_dimensions;
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                let (model_x, model_y) = letterbox.to_model_coords(x, y);
                let value = tensor
                    .get([0, 0, rescale(model_y, mask_height), rescale(model_x, mask_width)])
                    .copied()
                    .unwrap_or(0.0);
                data.push((value.clamp(0.0, 1.0) * 255.0).round() as u8);
            }
        }

        Ok(SegmentationMask::new(data, original_dimensions))
    }

    /// Use the mask as the alpha channel; fully transparent pixels become `[0, 0, 0, 0]`
    #[must_use]
    pub fn apply_background_removal(image: &DynamicImage, mask: &SegmentationMask) -> RgbaImage {
        let mut rgba = image.to_rgba8();
        for (x, y, pixel) in rgba.enumerate_pixels_mut() {
            let alpha = mask.value_at(x, y);
            *pixel = if alpha == 0 {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([pixel.0[0], pixel.0[1], pixel.0[2], alpha])
            };
        }
        rgba
    }
}
