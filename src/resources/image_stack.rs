//! Volumetric image-stack resource.
//!
//! A stack of image slices (one file per layer) decoded into a normalized
//! RGBA float grid. Rows are stored bottom-up so the payload's first row is
//! the image's lowest; grayscale and RGB inputs expand to RGBA. Color types
//! the kernels cannot map are rejected.

use std::path::{Path, PathBuf};

use image::DynamicImage;

use crate::kernel::payload::PrimitiveBuffer;
use crate::kernel::types::PrimitiveType;
use crate::resources::ResourceError;

/// One decoded layer: normalized RGBA, rows bottom-up.
#[derive(Debug)]
pub struct ImageLayer {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<f32>,
}

pub struct ImageStackResource {
    paths: Vec<PathBuf>,
    layers: Vec<ImageLayer>,
}

impl ImageStackResource {
    pub fn from_files(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            layers: Vec::new(),
        }
    }

    /// Stack from pre-decoded layers (e.g. container-embedded images).
    pub fn from_layers(layers: Vec<ImageLayer>) -> Self {
        Self {
            paths: Vec::new(),
            layers,
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len().max(self.paths.len())
    }

    pub fn build_payload(&mut self) -> Result<PrimitiveBuffer, ResourceError> {
        if self.layers.is_empty() {
            for path in &self.paths {
                self.layers.push(decode_layer(path)?);
            }
        }

        let mut payload = PrimitiveBuffer::default();
        let Some(first) = self.layers.first() else {
            return Ok(payload);
        };
        let (width, height) = (first.width, first.height);
        for layer in &self.layers {
            if layer.width != width || layer.height != height {
                return Err(ResourceError::IoError(format!(
                    "image stack layer size mismatch: {}x{} vs {}x{}",
                    layer.width, layer.height, width, height
                )));
            }
        }

        let mut meta = payload.open_meta(PrimitiveType::ImageStack);
        meta.scaling = 1.0;
        payload.data.extend_from_slice(&[
            width as f32,
            height as f32,
            self.layers.len() as f32,
        ]);
        for layer in &self.layers {
            payload.data.extend_from_slice(&layer.rgba);
        }
        payload.close_meta(meta);
        Ok(payload)
    }
}

/// Decode one slice into normalized bottom-up RGBA.
pub fn decode_layer(path: &Path) -> Result<ImageLayer, ResourceError> {
    let bytes = std::fs::read(path)?;
    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| ResourceError::IoError(format!("{}: {e}", path.display())))?;
    normalize_image(decoded, &path.display().to_string())
}

/// Map a decoded image to normalized RGBA floats, rows reversed so the
/// bottom row comes first.
pub fn normalize_image(
    image: DynamicImage,
    origin: &str,
) -> Result<ImageLayer, ResourceError> {
    let (width, height, rgba) = match image {
        DynamicImage::ImageLuma8(img) => {
            let (w, h) = img.dimensions();
            (w, h, expand(&img.into_raw(), 1, 255.0))
        }
        DynamicImage::ImageLumaA8(img) => {
            let (w, h) = img.dimensions();
            (w, h, expand(&img.into_raw(), 2, 255.0))
        }
        DynamicImage::ImageRgb8(img) => {
            let (w, h) = img.dimensions();
            (w, h, expand(&img.into_raw(), 3, 255.0))
        }
        DynamicImage::ImageRgba8(img) => {
            let (w, h) = img.dimensions();
            (w, h, expand(&img.into_raw(), 4, 255.0))
        }
        DynamicImage::ImageLuma16(img) => {
            let (w, h) = img.dimensions();
            (w, h, expand(&img.into_raw(), 1, 65535.0))
        }
        DynamicImage::ImageLumaA16(img) => {
            let (w, h) = img.dimensions();
            (w, h, expand(&img.into_raw(), 2, 65535.0))
        }
        DynamicImage::ImageRgb16(img) => {
            let (w, h) = img.dimensions();
            (w, h, expand(&img.into_raw(), 3, 65535.0))
        }
        DynamicImage::ImageRgba16(img) => {
            let (w, h) = img.dimensions();
            (w, h, expand(&img.into_raw(), 4, 65535.0))
        }
        other => {
            return Err(ResourceError::UnsupportedPixelFormat(format!(
                "{origin}: {:?}",
                other.color()
            )));
        }
    };

    // Reverse rows: slice images are stored top-down, the build volume
    // grows bottom-up.
    let row = (width * 4) as usize;
    let mut flipped = Vec::with_capacity(rgba.len());
    for y in (0..height as usize).rev() {
        flipped.extend_from_slice(&rgba[y * row..(y + 1) * row]);
    }

    Ok(ImageLayer {
        width,
        height,
        rgba: flipped,
    })
}

/// Expand `channels`-per-pixel samples to normalized RGBA.
fn expand<T: Copy + Into<f32>>(samples: &[T], channels: usize, scale: f32) -> Vec<f32> {
    let pixel_count = samples.len() / channels;
    let mut out = Vec::with_capacity(pixel_count * 4);
    for px in samples.chunks_exact(channels) {
        let (r, g, b, a) = match channels {
            1 => {
                let v = px[0].into() / scale;
                (v, v, v, 1.0)
            }
            2 => {
                let v = px[0].into() / scale;
                (v, v, v, px[1].into() / scale)
            }
            3 => (
                px[0].into() / scale,
                px[1].into() / scale,
                px[2].into() / scale,
                1.0,
            ),
            _ => (
                px[0].into() / scale,
                px[1].into() / scale,
                px[2].into() / scale,
                px[3].into() / scale,
            ),
        };
        out.extend_from_slice(&[r, g, b, a]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbaImage};

    fn gradient_gray(width: u32, height: u32) -> DynamicImage {
        let mut img = GrayImage::new(width, height);
        for (x, y, px) in img.enumerate_pixels_mut() {
            px.0 = [((x + y * width) % 256) as u8];
        }
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn grayscale_expands_to_rgba() {
        let layer = normalize_image(gradient_gray(4, 2), "test").unwrap();
        assert_eq!(layer.rgba.len(), 4 * 2 * 4);
        // Gray replicated into rgb, alpha 1.
        assert_eq!(layer.rgba[0], layer.rgba[1]);
        assert_eq!(layer.rgba[1], layer.rgba[2]);
        assert_eq!(layer.rgba[3], 1.0);
    }

    #[test]
    fn rows_are_stored_bottom_up() {
        // 1x2 image: top pixel 0, bottom pixel 255.
        let mut img = GrayImage::new(1, 2);
        img.put_pixel(0, 0, image::Luma([0]));
        img.put_pixel(0, 1, image::Luma([255]));
        let layer = normalize_image(DynamicImage::ImageLuma8(img), "test").unwrap();
        // First stored row is the image's bottom row (255).
        assert_eq!(layer.rgba[0], 1.0);
        assert_eq!(layer.rgba[4], 0.0);
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let img = DynamicImage::ImageRgb32F(image::Rgb32FImage::new(2, 2));
        let err = normalize_image(img, "test").unwrap_err();
        assert!(matches!(err, ResourceError::UnsupportedPixelFormat(_)));
    }

    #[test]
    fn payload_header_carries_dimensions() {
        let layers = vec![
            normalize_image(gradient_gray(4, 4), "l0").unwrap(),
            normalize_image(gradient_gray(4, 4), "l1").unwrap(),
        ];
        let mut stack = ImageStackResource::from_layers(layers);
        let payload = stack.build_payload().unwrap();
        assert_eq!(payload.meta.len(), 1);
        assert_eq!(
            payload.meta[0].primitive_type().unwrap(),
            PrimitiveType::ImageStack
        );
        assert_eq!(&payload.data[..3], &[4.0, 4.0, 2.0]);
        assert_eq!(payload.data.len(), 3 + 2 * 4 * 4 * 4);
    }

    #[test]
    fn mismatched_layer_sizes_are_an_error() {
        let layers = vec![
            normalize_image(gradient_gray(4, 4), "l0").unwrap(),
            normalize_image(gradient_gray(8, 8), "l1").unwrap(),
        ];
        let mut stack = ImageStackResource::from_layers(layers);
        assert!(matches!(
            stack.build_payload(),
            Err(ResourceError::IoError(_))
        ));
    }

    #[test]
    fn rgba_alpha_survives() {
        let mut img = RgbaImage::new(1, 1);
        img.put_pixel(0, 0, image::Rgba([255, 128, 0, 64]));
        let layer = normalize_image(DynamicImage::ImageRgba8(img), "test").unwrap();
        assert_eq!(layer.rgba[0], 1.0);
        assert!((layer.rgba[3] - 64.0 / 255.0).abs() < 1e-6);
    }
}
