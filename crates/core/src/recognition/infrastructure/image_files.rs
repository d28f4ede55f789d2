use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;

use crate::shared::constants::IMAGE_EXTENSIONS;
use crate::shared::frame::{Frame, FrameError};

#[derive(Error, Debug)]
pub enum ImageFileError {
    #[error("failed to read image {path}: {source}")]
    Read {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode JPEG: {0}")]
    Encode(#[source] image::ImageError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// True when the path has one of the supported still-image extensions.
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn is_jpeg_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
        .unwrap_or(false)
}

/// Reads any supported image file as an RGB frame.
pub fn read_frame(path: &Path) -> Result<Frame, ImageFileError> {
    let img = image::open(path).map_err(|source| ImageFileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Frame::from_rgb_image(img.to_rgb8(), 0))
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame, ImageFileError> {
    let img = image::load_from_memory(bytes).map_err(ImageFileError::Decode)?;
    Ok(Frame::from_rgb_image(img.to_rgb8(), 0))
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, ImageFileError> {
    let img = frame.to_rgb_image()?;
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(&img)
        .map_err(ImageFileError::Encode)?;
    Ok(buf.into_inner())
}
