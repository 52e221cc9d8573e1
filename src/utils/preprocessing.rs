//! Image to tensor conversion for segmentation models
//!
//! Images are letterboxed: scaled to fit the square model input while keeping
//! the aspect ratio, then centred on a white canvas. [`Letterbox`] records the
//! geometry so the predicted mask can be mapped back to original pixels.

use crate::{
    error::{BgRemovalError, Result},
    models::PreprocessingConfig,
};
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use ndarray::Array4;

const PADDING_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Placement of the scaled image inside the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    /// Side length of the model input
    pub target_size: u32,
    /// Factor applied to original dimensions
    pub scale: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    /// Left padding in model pixels
    pub offset_x: u32,
    /// Top padding in model pixels
    pub offset_y: u32,
}

impl Letterbox {
    /// # Errors
    /// - Zero-sized image or target
    pub fn new(width: u32, height: u32, target_size: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(BgRemovalError::processing(format!(
                "Image has zero dimension: {width}x{height}"
            )));
        }
        if target_size == 0 {
            return Err(BgRemovalError::processing("Model input size must be positive"));
        }

        let target = target_size as f32;
        let scale = (target / width as f32).min(target / height as f32);
        let scaled_width = ((width as f32 * scale).round() as u32).clamp(1, target_size);
        let scaled_height = ((height as f32 * scale).round() as u32).clamp(1, target_size);

        Ok(Self {
            target_size,
            scale,
            scaled_width,
            scaled_height,
            offset_x: (target_size - scaled_width) / 2,
            offset_y: (target_size - scaled_height) / 2,
        })
    }

    /// Model-space coordinate for an original pixel centre, clamped to the scaled region
    #[must_use]
    pub fn to_model_coords(&self, x: u32, y: u32) -> (usize, usize) {
        let map = |value: u32, offset: u32, extent: u32| -> usize {
            let scaled = ((value as f32 + 0.5) * self.scale - 0.5).round().max(0.0) as u32;
            (offset + scaled.min(extent.saturating_sub(1))) as usize
        };
        (
            map(x, self.offset_x, self.scaled_width),
            map(y, self.offset_y, self.scaled_height),
        )
    }
}

pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Letterbox an image into a normalized NCHW tensor
    ///
    /// # Errors
    /// - Zero-sized image or model input
    /// - Non-square model input
    pub fn preprocess_for_inference(
        image: &DynamicImage,
        preprocessing_config: &PreprocessingConfig,
    ) -> Result<(Array4<f32>, Letterbox)> {
        let [height, width] = preprocessing_config.target_size;
        if height != width {
            return Err(BgRemovalError::processing(format!(
                "Only square model inputs are supported, got {width}x{height}"
            )));
        }

        let rgb_image = image.to_rgb8();
        let letterbox = Letterbox::new(rgb_image.width(), rgb_image.height(), width)?;
        let canvas = Self::letterbox_canvas(&rgb_image, &letterbox);
        let tensor = Self::canvas_to_tensor(&canvas, preprocessing_config);
        Ok((tensor, letterbox))
    }

    fn letterbox_canvas(rgb_image: &RgbImage, letterbox: &Letterbox) -> RgbImage {
        let resized = image::imageops::resize(
            rgb_image,
            letterbox.scaled_width,
            letterbox.scaled_height,
            image::imageops::FilterType::Triangle,
        );
        let mut canvas =
            ImageBuffer::from_pixel(letterbox.target_size, letterbox.target_size, PADDING_COLOR);
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(letterbox.offset_x),
            i64::from(letterbox.offset_y),
        );
        canvas
    }

    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let size = canvas.width() as usize;
        Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            let pixel = canvas.get_pixel(x as u32, y as u32);
            let value = f32::from(pixel.0.get(channel).copied().unwrap_or(0)) / 255.0;
            let mean = config.normalization_mean.get(channel).copied().unwrap_or(0.0);
            let std = config.normalization_std.get(channel).copied().unwrap_or(1.0);
            (value - mean) / std
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(size: u32) -> PreprocessingConfig {
        PreprocessingConfig {
            target_size: [size, size],
            normalization_mean: [0.5, 0.5, 0.5],
            normalization_std: [1.0, 1.0, 1.0],
        }
    }

    #[test]
    fn test_letterbox_landscape() {
        let letterbox = Letterbox::new(200, 100, 64).unwrap();
        assert_eq!(letterbox.scaled_width, 64);
        assert_eq!(letterbox.scaled_height, 32);
        assert_eq!(letterbox.offset_x, 0);
        assert_eq!(letterbox.offset_y, 16);
    }

    #[test]
    fn test_letterbox_upscales_small_images() {
        let letterbox = Letterbox::new(10, 10, 64).unwrap();
        assert!((letterbox.scale - 6.4).abs() < 1e-6);
        assert_eq!((letterbox.scaled_width, letterbox.scaled_height), (64, 64));
        assert_eq!(letterbox.to_model_coords(0, 0), (3, 3));
        assert_eq!(letterbox.to_model_coords(9, 9), (60, 60));
    }

    #[test]
    fn test_letterbox_extreme_aspect_keeps_one_pixel() {
        let letterbox = Letterbox::new(1000, 1, 32).unwrap();
        assert_eq!(letterbox.scaled_height, 1);
        assert_eq!(letterbox.to_model_coords(999, 0), (31, 15));
    }

    #[test]
    fn test_letterbox_rejects_zero_dimensions() {
        assert!(Letterbox::new(0, 10, 64).is_err());
        assert!(Letterbox::new(10, 10, 0).is_err());
    }

    #[test]
    fn test_tensor_shape_and_normalization() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(20, 10, Rgb([255, 0, 0])));
        let (tensor, letterbox) =
            ImagePreprocessor::preprocess_for_inference(&image, &config(32)).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
        assert_eq!(letterbox.offset_y, 8);

        // Image content: red normalized with mean 0.5, std 1.0
        assert!((tensor[[0, 0, 16, 16]] - 0.5).abs() < 1e-6);
        assert!((tensor[[0, 1, 16, 16]] + 0.5).abs() < 1e-6);
        // White padding above the image
        assert!((tensor[[0, 1, 0, 16]] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_non_square_input() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 4, Rgb([0, 0, 0])));
        let mut config = config(32);
        config.target_size = [32, 64];
        assert!(ImagePreprocessor::preprocess_for_inference(&image, &config).is_err());
    }
}
