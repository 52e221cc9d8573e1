//! Result types produced by the removal pipeline

use crate::error::Result;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Per-pixel foreground opacity (0-255) at original image resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationMask {
    /// Row-major grayscale values
    pub data: Vec<u8>,
    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Opacity at `(x, y)`, or 0 outside the mask
    #[must_use]
    pub fn value_at(&self, x: u32, y: u32) -> u8 {
        let (width, height) = self.dimensions;
        if x >= width || y >= height {
            return 0;
        }
        self.data
            .get(y as usize * width as usize + x as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Share of pixels more than half opaque
    #[must_use]
    pub fn foreground_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let foreground = self.data.iter().filter(|&&value| value > 127).count();
        foreground as f32 / self.data.len() as f32
    }
}

/// Timing breakdown for a single image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub image_decode_ms: u64,
    /// Resize, padding, normalization
    pub preprocessing_ms: u64,
    pub inference_ms: u64,
    /// Mask mapping and alpha application
    pub postprocessing_ms: u64,
    pub total_ms: u64,
}

/// Cut-out image together with the mask that produced it
#[derive(Debug, Clone)]
pub struct RemovalResult {
    /// RGBA image at original resolution with background made transparent
    pub image: RgbaImage,
    pub mask: SegmentationMask,
    pub original_dimensions: (u32, u32),
    pub timings: ProcessingTimings,
}

impl RemovalResult {
    #[must_use]
    pub fn new(
        image: RgbaImage,
        mask: SegmentationMask,
        original_dimensions: (u32, u32),
        timings: ProcessingTimings,
    ) -> Self {
        Self {
            image,
            mask,
            original_dimensions,
            timings,
        }
    }

    /// Encode the image as PNG, the only output format that keeps the alpha channel here
    ///
    /// # Errors
    /// - PNG encoding failures
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.image
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)?;
        Ok(buffer)
    }

    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[must_use]
    pub fn timing_summary(&self) -> String {
        let t = &self.timings;
        format!(
            "decode {}ms, preprocess {}ms, inference {}ms, postprocess {}ms, total {}ms",
            t.image_decode_ms, t.preprocessing_ms, t.inference_ms, t.postprocessing_ms, t.total_ms
        )
    }
}
