//! Image preprocessing
//!
//! Turns a decoded photograph into the normalized `[3, S, S]` tensor the network
//! was trained on: exact resize (no aspect-ratio preservation), scale to [0, 1],
//! then per-channel ImageNet normalization.

use std::path::Path;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use image::{imageops::FilterType, DynamicImage};
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, RoadAnomalyError};

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Target size and normalization constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Output width and height
    pub image_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            image_size: 224,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

impl PreprocessConfig {
    pub fn with_image_size(mut self, image_size: u32) -> Self {
        self.image_size = image_size;
        self
    }
}

/// Decode an encoded image (PNG, JPEG, ...) from memory
pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(bytes)?;
    ensure_not_empty(&image)?;
    Ok(image)
}

/// Read and decode an image file.
///
/// Unreadable and undecodable files are both `InvalidImage`.
pub fn open_path(path: &Path) -> Result<DynamicImage> {
    let bytes = std::fs::read(path).map_err(|e| {
        RoadAnomalyError::InvalidImage(format!("cannot read {}: {}", path.display(), e))
    })?;
    decode_bytes(&bytes)
        .map_err(|e| RoadAnomalyError::InvalidImage(format!("{}: {}", path.display(), e)))
}

fn ensure_not_empty(image: &DynamicImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(RoadAnomalyError::InvalidImage(format!(
            "image has no pixels ({}x{})",
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

/// Resize an image to exactly `size` x `size` with bilinear resampling
pub fn resize_image(image: &DynamicImage, size: u32) -> DynamicImage {
    image.resize_exact(size, size, FilterType::Triangle)
}

/// Normalize an image to a flat vector in CHW layout.
///
/// Any color type is coerced to RGB first; alpha is dropped.
pub fn normalize_image(image: &DynamicImage, mean: &[f32; 3], std: &[f32; 3]) -> Vec<f32> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    let num_pixels = (width * height) as usize;

    let mut normalized = vec![0.0f32; 3 * num_pixels];

    for (i, pixel) in rgb.pixels().enumerate() {
        for c in 0..3 {
            normalized[c * num_pixels + i] = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }

    normalized
}

/// Image -> normalized tensor of shape `[3, image_size, image_size]`
pub fn transform<B: Backend>(
    image: &DynamicImage,
    config: &PreprocessConfig,
    device: &B::Device,
) -> Result<Tensor<B, 3>> {
    ensure_not_empty(image)?;

    let size = config.image_size as usize;
    let resized = resize_image(image, config.image_size);
    let data = normalize_image(&resized, &config.mean, &config.std);

    Ok(Tensor::from_data(TensorData::new(data, [3, size, size]), device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    type TestBackend = NdArray;

    #[test]
    fn test_black_image_normalizes_to_negative_mean_over_std() {
        let device = Default::default();
        let image = DynamicImage::ImageRgb8(RgbImage::new(300, 300));

        let tensor = transform::<TestBackend>(&image, &PreprocessConfig::default(), &device).unwrap();
        assert_eq!(tensor.dims(), [3, 224, 224]);

        let channel_means: Vec<f32> = tensor
            .mean_dim(2)
            .mean_dim(1)
            .into_data()
            .to_vec()
            .unwrap();
        for c in 0..3 {
            let expected = -IMAGENET_MEAN[c] / IMAGENET_STD[c];
            assert!((channel_means[c] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_normalize_layout_is_channel_first() {
        let mut rgb = RgbImage::new(2, 1);
        rgb.put_pixel(0, 0, Rgb([255, 0, 0]));
        rgb.put_pixel(1, 0, Rgb([0, 0, 255]));

        let values = normalize_image(&DynamicImage::ImageRgb8(rgb), &[0.0; 3], &[1.0; 3]);
        assert_eq!(values, vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_grayscale_is_coerced_to_rgb() {
        let device = Default::default();
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 20, Luma([255])));
        let config = PreprocessConfig::default().with_image_size(32);

        let tensor = transform::<TestBackend>(&gray, &config, &device).unwrap();
        assert_eq!(tensor.dims(), [3, 32, 32]);

        let values: Vec<f32> = tensor.into_data().to_vec().unwrap();
        let expected_red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((values[0] - expected_red).abs() < 1e-5);
    }

    #[test]
    fn test_transform_is_deterministic() {
        let device = Default::default();
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(57, 31, |x, y| {
            Rgb([(x * 4) as u8, (y * 8) as u8, ((x + y) * 2) as u8])
        }));
        let config = PreprocessConfig::default();

        let a: Vec<f32> = transform::<TestBackend>(&image, &config, &device)
            .unwrap()
            .into_data()
            .to_vec()
            .unwrap();
        let b: Vec<f32> = transform::<TestBackend>(&image, &config, &device)
            .unwrap()
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_undecodable_bytes_are_invalid() {
        let err = decode_bytes(b"definitely not a jpeg").unwrap_err();
        assert!(matches!(err, RoadAnomalyError::InvalidImage(_)));
    }

    #[test]
    fn test_empty_image_is_invalid() {
        let device = Default::default();
        let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        let err = transform::<TestBackend>(&empty, &PreprocessConfig::default(), &device)
            .unwrap_err();
        assert!(matches!(err, RoadAnomalyError::InvalidImage(_)));
    }

    #[test]
    fn test_png_roundtrip_through_decoder() {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([10, 20, 30])))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let decoded = decode_bytes(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
    }

    #[test]
    fn test_missing_file_is_request_scoped() {
        let err = open_path(Path::new("/nonexistent/road.jpg")).unwrap_err();
        assert!(matches!(err, RoadAnomalyError::InvalidImage(_)));
        assert!(err.is_request_scoped());
    }
}
