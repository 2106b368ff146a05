//! Dominant color extraction.
//!
//! The image is cover-fit to a 100×100 thumbnail, up to 1000 pixels are
//! stride-sampled, every channel is quantized into 8 buckets of width 32, and
//! the most frequent quantized triples win. Extraction never fails: any
//! decode problem yields [`FALLBACK_COLOR`].

use std::collections::HashMap;

use image::imageops::FilterType;
use image::DynamicImage;
use tracing::warn;

use super::codec;
use crate::model::Rgb;

/// Returned whenever extraction cannot produce a color.
pub const FALLBACK_COLOR: Rgb = [128, 128, 128];

/// Side of the square thumbnail sampled for colors.
pub const SAMPLE_SIDE: u32 = 100;

/// Maximum number of sampled pixels.
pub const MAX_SAMPLES: usize = 1000;

/// Width of one quantization bucket (256 / 8).
pub const BUCKET_WIDTH: u8 = 32;

/// Snap a channel value to the lower edge of its bucket.
#[inline]
pub fn quantize(value: u8) -> u8 {
    (value / BUCKET_WIDTH) * BUCKET_WIDTH
}

/// Top `count` dominant colors of encoded image bytes, most frequent first.
pub fn extract_colors(source: &[u8], count: usize) -> Vec<Rgb> {
    match codec::decode(source) {
        Ok(image) => extract_colors_from_image(&image, count),
        Err(e) => {
            warn!(error = %e, "Color extraction failed, using fallback color");
            vec![FALLBACK_COLOR]
        }
    }
}

/// Most frequent quantized color of encoded image bytes.
pub fn dominant_color(source: &[u8]) -> Rgb {
    first_or_fallback(extract_colors(source, 1))
}

/// Most frequent quantized color of an already decoded image.
pub fn dominant_color_of(image: &DynamicImage) -> Rgb {
    first_or_fallback(extract_colors_from_image(image, 1))
}

fn first_or_fallback(colors: Vec<Rgb>) -> Rgb {
    colors.into_iter().next().unwrap_or(FALLBACK_COLOR)
}

/// Top `count` dominant colors of a decoded image.
///
/// Frequency ties are broken by the smaller triple so results do not depend
/// on hash iteration order.
pub fn extract_colors_from_image(image: &DynamicImage, count: usize) -> Vec<Rgb> {
    if image.width() == 0 || image.height() == 0 {
        return vec![FALLBACK_COLOR];
    }

    let thumbnail = image
        .resize_to_fill(SAMPLE_SIDE, SAMPLE_SIDE, FilterType::Triangle)
        .to_rgb8();

    let pixel_count = (thumbnail.width() * thumbnail.height()) as usize;
    let sample_size = pixel_count.min(MAX_SAMPLES).max(1);
    let step = (pixel_count / sample_size).max(1);

    let mut frequencies: HashMap<Rgb, usize> = HashMap::new();
    for pixel in thumbnail.pixels().step_by(step) {
        let [r, g, b] = pixel.0;
        *frequencies
            .entry([quantize(r), quantize(g), quantize(b)])
            .or_insert(0) += 1;
    }

    let mut ranked: Vec<(Rgb, usize)> = frequencies.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let colors: Vec<Rgb> = ranked
        .into_iter()
        .take(count.max(1))
        .map(|(color, _)| color)
        .collect();

    if colors.is_empty() {
        vec![FALLBACK_COLOR]
    } else {
        colors
    }
}
