//! Async background-removal capability shared by HTTP handlers

use crate::error::{BgRemovalError, Result};
use crate::processor::BackgroundRemovalProcessor;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

/// Turns encoded image bytes into a PNG with a transparent background
///
/// Implementations are shared across concurrent requests.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    /// # Errors
    /// - Undecodable image data
    /// - Any inference or encoding failure
    async fn remove_background(&self, image_bytes: Vec<u8>) -> Result<Vec<u8>>;
}

/// Runs a [`BackgroundRemovalProcessor`] on the blocking thread pool
///
/// The model session is not reentrant, so requests take turns on it while
/// the async runtime stays free for I/O.
#[derive(Debug, Clone)]
pub struct ModelBackgroundRemover {
    processor: Arc<Mutex<BackgroundRemovalProcessor>>,
}

impl ModelBackgroundRemover {
    #[must_use]
    pub fn new(processor: BackgroundRemovalProcessor) -> Self {
        Self {
            processor: Arc::new(Mutex::new(processor)),
        }
    }

    /// Load the model ahead of the first request
    ///
    /// # Errors
    /// - Model resolution or session creation failures
    pub async fn warm_up(&self) -> Result<()> {
        let processor = Arc::clone(&self.processor);
        tokio::task::spawn_blocking(move || {
            lock_processor(&processor).initialize().map(|_| ())
        })
        .await
        .map_err(|e| BgRemovalError::internal(format!("Model warm-up task failed: {e}")))?
    }
}

/// Lock the processor, recovering from a panic in an earlier request
///
/// A panic can leave the backend mid-inference, so it is dropped and the model
/// reloads on the next call instead of failing every later request.
fn lock_processor(
    processor: &Mutex<BackgroundRemovalProcessor>,
) -> MutexGuard<'_, BackgroundRemovalProcessor> {
    match processor.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            processor.clear_poison();
            let mut guard = poisoned.into_inner();
            log::warn!("Previous request panicked during processing, reloading the model");
            guard.reset();
            guard
        },
    }
}

#[async_trait]
impl BackgroundRemover for ModelBackgroundRemover {
    async fn remove_background(&self, image_bytes: Vec<u8>) -> Result<Vec<u8>> {
        let processor = Arc::clone(&self.processor);
        tokio::task::spawn_blocking(move || {
            let mut processor = lock_processor(&processor);
            let result = processor.process_bytes(&image_bytes)?;
            log::debug!("{}", result.timing_summary());
            result.to_png_bytes()
        })
        .await
        .map_err(|e| BgRemovalError::internal(format!("Background removal task failed: {e}")))?
    }
}
