//! Mock inference backend for exercising the pipeline without model files

use crate::{
    config::RemovalConfig,
    error::{BgRemovalError, Result},
    inference::InferenceBackend,
    models::{ModelInfo, PreprocessingConfig},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Backend producing a soft circular foreground mask centred in the model input
#[derive(Debug, Clone)]
pub struct MockBackend {
    initialized: bool,
    size: usize,
    fail_init: bool,
    fail_inference: bool,
    infer_calls: Arc<AtomicUsize>,
}

impl MockBackend {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            initialized: false,
            size,
            fail_init: false,
            fail_inference: false,
            infer_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn failing_init(size: usize) -> Self {
        Self {
            fail_init: true,
            ..Self::new(size)
        }
    }

    #[must_use]
    pub fn failing_inference(size: usize) -> Self {
        Self {
            fail_inference: true,
            ..Self::new(size)
        }
    }

    /// Shared counter of `infer` calls, readable after the backend is boxed
    #[must_use]
    pub fn infer_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.infer_calls)
    }

    fn circular_mask(&self) -> Array4<f32> {
        let center = self.size as f32 / 2.0;
        let radius = (self.size as f32 / 3.0).max(1.0);
        Array4::from_shape_fn((1, 1, self.size, self.size), |(_, _, y, x)| {
            let dx = x as f32 + 0.5 - center;
            let dy = y as f32 + 0.5 - center;
            let distance = (dx * dx + dy * dy).sqrt();
            if distance < radius {
                ((radius - distance) / radius * 4.0).min(1.0)
            } else {
                0.0
            }
        })
    }
}

impl InferenceBackend for MockBackend {
    fn initialize(&mut self, _config: &RemovalConfig) -> Result<Option<Duration>> {
        if self.fail_init {
            return Err(BgRemovalError::model("Mock backend initialization failed"));
        }
        if self.initialized {
            return Ok(None);
        }
        self.initialized = true;
        Ok(Some(Duration::from_millis(1)))
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.infer_calls.fetch_add(1, Ordering::SeqCst);
        if !self.initialized {
            return Err(BgRemovalError::internal("Backend not initialized"));
        }
        if self.fail_inference {
            return Err(BgRemovalError::inference("Mock inference failed"));
        }
        if input.dim() != self.input_shape() {
            return Err(BgRemovalError::inference(format!(
                "Unexpected input shape {:?}",
                input.dim()
            )));
        }
        Ok(self.circular_mask())
    }

    fn input_shape(&self) -> (usize, usize, usize, usize) {
        (1, 3, self.size, self.size)
    }

    fn output_shape(&self) -> (usize, usize, usize, usize) {
        (1, 1, self.size, self.size)
    }

    fn get_preprocessing_config(&self) -> Result<PreprocessingConfig> {
        Ok(PreprocessingConfig {
            target_size: [self.size as u32, self.size as u32],
            ..PreprocessingConfig::default()
        })
    }

    fn get_model_info(&self) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: "mock-model".to_string(),
            precision: "fp32".to_string(),
            size_bytes: 1024,
            input_shape: self.input_shape(),
            output_shape: self.output_shape(),
        })
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}
