//! Blank-tile detection.
//!
//! Map services answer requests outside their coverage with a uniformly
//! black image. A tile is blank when every channel's extrema are exactly
//! `(0, 0)`; alpha counts as a channel, so an opaque black tile is usable.

use crate::Result;
use image::{DynamicImage, ImageBuffer, ImageFormat, Pixel};
use std::ops::Deref;

/// Outcome of classifying a fetched tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileClass {
    /// No-data sentinel; record as blank and discard.
    Blank,
    /// Real imagery; write it out.
    Usable,
}

/// Per-channel `(min, max)` sample values.
pub type Extrema = Vec<(f64, f64)>;

/// Decode `bytes` and classify the image.
pub fn classify_tile(bytes: &[u8]) -> Result<TileClass> {
    let image = image::load_from_memory(bytes)?;
    Ok(classify_image(&image))
}

/// Classify an already decoded image.
pub fn classify_image(image: &DynamicImage) -> TileClass {
    if channel_extrema(image)
        .iter()
        .all(|&(min, max)| min == 0.0 && max == 0.0)
    {
        TileClass::Blank
    } else {
        TileClass::Usable
    }
}

/// Per-channel extrema in the image's native sample type.
pub fn channel_extrema(image: &DynamicImage) -> Extrema {
    match image {
        DynamicImage::ImageLuma8(buf) => buffer_extrema(buf),
        DynamicImage::ImageLumaA8(buf) => buffer_extrema(buf),
        DynamicImage::ImageRgb8(buf) => buffer_extrema(buf),
        DynamicImage::ImageRgba8(buf) => buffer_extrema(buf),
        DynamicImage::ImageLuma16(buf) => buffer_extrema(buf),
        DynamicImage::ImageLumaA16(buf) => buffer_extrema(buf),
        DynamicImage::ImageRgb16(buf) => buffer_extrema(buf),
        DynamicImage::ImageRgba16(buf) => buffer_extrema(buf),
        DynamicImage::ImageRgb32F(buf) => buffer_extrema(buf),
        DynamicImage::ImageRgba32F(buf) => buffer_extrema(buf),
        other => buffer_extrema(&other.to_rgba32f()),
    }
}

fn buffer_extrema<P, C>(buf: &ImageBuffer<P, C>) -> Extrema
where
    P: Pixel,
    P::Subpixel: Into<f64>,
    C: Deref<Target = [P::Subpixel]>,
{
    let channels = P::CHANNEL_COUNT as usize;
    let mut extrema = vec![(f64::INFINITY, f64::NEG_INFINITY); channels];
    for pixel in buf.pixels() {
        for (slot, &sample) in extrema.iter_mut().zip(pixel.channels()) {
            let value: f64 = sample.into();
            slot.0 = slot.0.min(value);
            slot.1 = slot.1.max(value);
        }
    }
    extrema
}

/// File extension for the encoded tile, `png` when the format is unknown.
pub fn tile_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or_else(|| ImageFormat::Png.extensions_str()[0])
}
