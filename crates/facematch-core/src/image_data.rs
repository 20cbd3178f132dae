//! Face crops as self-contained image encodings (base64 data URIs).

use crate::types::DetectedFace;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use thiserror::Error;

/// Side length of the square face crop handed to the embedding model.
pub const FACE_CROP_SIZE: u32 = 224;
const FACE_CROP_PADDING: f32 = 0.2;
const JPEG_QUALITY: u8 = 80;
const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Error, Debug)]
pub enum ImageDataError {
    #[error("invalid data URI: {0}")]
    InvalidDataUri(String),
    #[error("base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("face crop is empty after clamping to the frame")]
    EmptyCrop,
}

/// Decode a `data:<mime>;base64,<payload>` URI, or a bare base64 payload.
pub fn decode_data_uri(input: &str) -> Result<DynamicImage, ImageDataError> {
    let payload = match input.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| ImageDataError::InvalidDataUri("missing ',' separator".into()))?;
            if !header.ends_with(";base64") {
                return Err(ImageDataError::InvalidDataUri(format!(
                    "unsupported encoding in header {header:?}"
                )));
            }
            payload
        }
        None => input,
    };

    let bytes = BASE64.decode(payload.trim())?;
    Ok(image::load_from_memory(&bytes)?)
}

/// Encode an image as a JPEG data URI.
pub fn encode_data_uri(img: &DynamicImage) -> Result<String, ImageDataError> {
    let rgb = img.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY).encode_image(&rgb)?;
    Ok(format!("{JPEG_DATA_URI_PREFIX}{}", BASE64.encode(jpeg)))
}

/// Crop a detected face out of `frame` with 20% padding, resized to
/// [`FACE_CROP_SIZE`] square, as a JPEG data URI.
pub fn extract_face_image(frame: &DynamicImage, face: &DetectedFace) -> Result<String, ImageDataError> {
    let crop = crop_face(frame, face)?;
    encode_data_uri(&crop)
}

/// Padded, clamped and resized face region.
pub fn crop_face(frame: &DynamicImage, face: &DetectedFace) -> Result<DynamicImage, ImageDataError> {
    let frame_w = frame.width() as f32;
    let frame_h = frame.height() as f32;

    let padding = face.width.max(face.height) * FACE_CROP_PADDING;
    let x = (face.x - padding).max(0.0);
    let y = (face.y - padding).max(0.0);
    let width = (frame_w - x).min(face.width + padding * 2.0);
    let height = (frame_h - y).min(face.height + padding * 2.0);

    if !(width >= 1.0 && height >= 1.0) {
        return Err(ImageDataError::EmptyCrop);
    }

    let region = frame.crop_imm(x as u32, y as u32, width as u32, height as u32);
    Ok(region.resize_exact(FACE_CROP_SIZE, FACE_CROP_SIZE, FilterType::Triangle))
}
