//! Image codec helpers.
//!
//! Thin wrappers over the `image` crate for the operations the pipeline
//! needs: decoding fetched bytes, probing dimensions, and encoding the final
//! canvas. Only JPEG and PNG output is supported.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::MosaicError;

/// JPEG quality used for published composites.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Output format of a rendered mosaic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    #[serde(alias = "jpeg")]
    Jpg,
    Png,
}

impl OutputFormat {
    /// Parse a format name ("jpg", "jpeg", "png"), case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(OutputFormat::Jpg),
            "png" => Some(OutputFormat::Png),
            _ => None,
        }
    }

    /// File extension, also used as the storage format name.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

/// Decode bytes in any supported format.
pub fn decode(source: &[u8]) -> Result<DynamicImage, image::ImageError> {
    ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .decode()
}

/// Get image dimensions without fully decoding.
pub fn dimensions(source: &[u8]) -> Result<(u32, u32), image::ImageError> {
    ImageReader::new(Cursor::new(source))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .into_dimensions()
}

/// Encode an RGB canvas in the requested format.
pub fn encode(canvas: &RgbImage, format: OutputFormat) -> Result<Bytes, MosaicError> {
    let mut output = Vec::new();

    match format {
        OutputFormat::Jpg => {
            let mut encoder = JpegEncoder::new_with_quality(&mut output, DEFAULT_JPEG_QUALITY);
            encoder.encode_image(canvas).map_err(MosaicError::image)?;
        }
        OutputFormat::Png => {
            canvas
                .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
                .map_err(MosaicError::image)?;
        }
    }

    Ok(Bytes::from(output))
}
