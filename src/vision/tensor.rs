//! Tensor conversion for the recognition model
//!
//! Resizes a cell crop to the model's fixed input height and converts it to a
//! normalized NCHW tensor.

use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::{Array3, Array4};

/// Recognition input configuration
#[derive(Debug, Clone)]
pub struct TensorConfig {
    /// Model input height
    pub target_height: u32,
    /// Widest input the model accepts
    pub max_width: u32,
    /// Mean values for normalization [R, G, B]
    pub mean: [f32; 3],
    /// Std values for normalization [R, G, B]
    pub std: [f32; 3],
}

impl Default for TensorConfig {
    fn default() -> Self {
        Self {
            target_height: 48,
            max_width: 640,
            // (pixel / 255 - 0.5) / 0.5 maps [0, 255] to [-1, 1]
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        }
    }
}

/// Convert an RGB image to an HWC f32 array in 0-1
pub fn rgb_to_f32(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut rgb = Array3::<f32>::zeros((height as usize, width as usize, 3));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            rgb[[y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
        }
    }

    rgb
}

/// Normalize image with mean and std
pub fn normalize(image: &Array3<f32>, mean: &[f32; 3], std: &[f32; 3]) -> Array3<f32> {
    let mut normalized = image.clone();
    for ((_, _, c), value) in normalized.indexed_iter_mut() {
        *value = (*value - mean[c]) / std[c];
    }
    normalized
}

/// Convert HWC image to NCHW tensor (batch size 1)
pub fn hwc_to_nchw(image: &Array3<f32>) -> Array4<f32> {
    let (h, w, c) = image.dim();
    let mut tensor = Array4::<f32>::zeros((1, c, h, w));

    for ((y, x, ch), value) in image.indexed_iter() {
        tensor[[0, ch, y, x]] = *value;
    }

    tensor
}

/// Scale to a fixed height keeping the aspect ratio, width capped at `max_width`
pub fn resize_for_recognition(image: &RgbImage, target_height: u32, max_width: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let scale = target_height as f32 / h.max(1) as f32;
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, max_width.max(1));
    imageops::resize(image, new_w, target_height, FilterType::Triangle)
}

/// Full preprocessing pipeline for recognition
pub fn recognition_tensor(image: &RgbImage, config: &TensorConfig) -> Array4<f32> {
    let resized = resize_for_recognition(image, config.target_height, config.max_width);
    let normalized = normalize(&rgb_to_f32(&resized), &config.mean, &config.std);
    hwc_to_nchw(&normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_rgb_to_f32() {
        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 128]));

        let rgb = rgb_to_f32(&img);

        assert_eq!(rgb.dim(), (1, 2, 3));
        assert!((rgb[[0, 0, 0]] - 1.0).abs() < 0.01);
        assert!(rgb[[0, 0, 1]].abs() < 0.01);
        assert!((rgb[[0, 1, 2]] - 0.502).abs() < 0.01);
    }

    #[test]
    fn test_hwc_to_nchw() {
        let hwc = Array3::<f32>::from_shape_fn((10, 20, 3), |(h, w, c)| {
            (h * 100 + w * 10 + c) as f32
        });

        let nchw = hwc_to_nchw(&hwc);

        assert_eq!(nchw.dim(), (1, 3, 10, 20));
        assert_eq!(nchw[[0, 1, 5, 10]], hwc[[5, 10, 1]]);
    }

    #[test]
    fn test_normalize_maps_to_unit_range() {
        let image = Array3::<f32>::from_shape_fn((1, 2, 3), |(_, x, _)| x as f32);
        let normalized = normalize(&image, &[0.5; 3], &[0.5; 3]);
        assert!((normalized[[0, 0, 0]] + 1.0).abs() < 1e-6);
        assert!((normalized[[0, 1, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_resize_keeps_aspect_ratio() {
        let img = RgbImage::new(100, 24);
        assert_eq!(resize_for_recognition(&img, 48, 640).dimensions(), (200, 48));
    }

    #[test]
    fn test_resize_caps_width() {
        let img = RgbImage::new(1000, 20);
        assert_eq!(resize_for_recognition(&img, 48, 640).dimensions(), (640, 48));
    }

    #[test]
    fn test_recognition_tensor_shape() {
        let img = RgbImage::from_pixel(60, 30, Rgb([255, 255, 255]));
        let tensor = recognition_tensor(&img, &TensorConfig::default());
        assert_eq!(tensor.dim(), (1, 3, 48, 96));
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 0.01);
    }
}
