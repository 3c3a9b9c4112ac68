//! Still-frame encoding: downscale, JPEG, base64, perceptual hash.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use image_hasher::{HashAlg, HasherConfig, ImageHash};

use crate::error::DeviceError;
use crate::models::RawFrame;

pub struct EncodedFrame {
    pub width: u32,
    pub height: u32,
    pub jpeg_base64: String,
    pub jpeg_bytes: usize,
    pub phash: String,
}

pub fn encode_frame(
    raw: RawFrame,
    quality: u8,
    max_width: u32,
) -> Result<EncodedFrame, DeviceError> {
    let (width, height) = (raw.width, raw.height);
    let rgba = RgbaImage::from_raw(width, height, raw.rgba).ok_or_else(|| {
        DeviceError::Capture(format!("frame buffer does not match {width}x{height}"))
    })?;

    let rgba = if width > max_width && max_width > 0 {
        let scaled_height = ((height as u64 * max_width as u64) / width as u64).max(1) as u32;
        imageops::resize(&rgba, max_width, scaled_height, FilterType::Triangle)
    } else {
        rgba
    };

    let image = DynamicImage::ImageRgba8(rgba);
    let rgb = image.to_rgb8();

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|err| DeviceError::Capture(format!("jpeg encoding failed: {err}")))?;

    Ok(EncodedFrame {
        width: rgb.width(),
        height: rgb.height(),
        jpeg_bytes: jpeg.len(),
        jpeg_base64: base64::engine::general_purpose::STANDARD.encode(&jpeg),
        phash: compute_phash(&image),
    })
}

pub fn compute_phash(image: &DynamicImage) -> String {
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();

    hasher.hash_image(image).to_base64()
}

/// Bit distance between two encoded hashes; `u32::MAX` if either is invalid.
pub fn hamming_distance(lhs: &str, rhs: &str) -> u32 {
    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(lhs) else {
        return u32::MAX;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(rhs) else {
        return u32::MAX;
    };
    h1.dist(&h2)
}
