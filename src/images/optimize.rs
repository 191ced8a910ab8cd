//! Decoding, resizing and recompression of downloaded images

use super::ImageError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::io::Cursor;

/// Settings for [`optimize_image`]
#[derive(Debug, Clone, Copy)]
pub struct OptimizeSettings {
    /// Images wider than this are scaled down, preserving aspect ratio
    pub max_width: u32,
    /// JPEG quality (1-100)
    pub quality: u8,
    /// When false, images are only decoded to validate them and read dimensions
    pub enabled: bool,
}

/// Output of [`optimize_image`]
#[derive(Debug, Clone)]
pub struct OptimizedImage {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
    pub width: u32,
    pub height: u32,
    /// True if `bytes` differ from the downloaded bytes
    pub optimized: bool,
}

/// Decodes `raw` and, if enabled, resizes and recompresses it
///
/// JPEG and WebP sources are recompressed as JPEG at the configured quality.
/// PNG sources are re-encoded as PNG only when they had to be resized.
/// GIFs are kept as downloaded so animations survive.
///
/// This is CPU bound and should run on a blocking thread.
pub fn optimize_image(raw: &[u8], settings: OptimizeSettings) -> Result<OptimizedImage, ImageError> {
    let format = image::guess_format(raw).map_err(|e| ImageError::Decode(e.to_string()))?;
    let decoded = image::load_from_memory_with_format(raw, format)
        .map_err(|e| ImageError::Decode(e.to_string()))?;
    let (width, height) = decoded.dimensions();

    let original = |extension| OptimizedImage {
        bytes: raw.to_vec(),
        extension,
        width,
        height,
        optimized: false,
    };

    if !settings.enabled {
        return Ok(original(extension_for(format)));
    }

    let needs_resize = width > settings.max_width;
    let resized = if needs_resize {
        let target_height = ((height as u64 * settings.max_width as u64) / width as u64).max(1) as u32;
        decoded.resize(settings.max_width, target_height, FilterType::Lanczos3)
    } else {
        decoded
    };

    match format {
        ImageFormat::Gif => Ok(original("gif")),
        ImageFormat::Png if !needs_resize => Ok(original("png")),
        ImageFormat::Png => {
            let bytes = encode(&resized, ImageFormat::Png)?;
            Ok(OptimizedImage {
                bytes,
                extension: "png",
                width: resized.width(),
                height: resized.height(),
                optimized: true,
            })
        }
        _ => {
            let bytes = encode_jpeg(&resized, settings.quality)?;
            Ok(OptimizedImage {
                bytes,
                extension: "jpg",
                width: resized.width(),
                height: resized.height(),
                optimized: true,
            })
        }
    }
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    image
        .to_rgb8()
        .write_with_encoder(encoder)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(buffer)
}

fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), format)
        .map_err(|e| ImageError::Encode(e.to_string()))?;
    Ok(buffer)
}

fn extension_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "png",
        ImageFormat::Gif => "gif",
        ImageFormat::WebP => "webp",
        _ => "jpg",
    }
}
