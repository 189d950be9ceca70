use std::borrow::Cow;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use rebirth_contracts::media::with_extension;
use rebirth_contracts::MediaAsset;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

pub const LOSSY_MIME: &str = "image/jpeg";
pub const LOSSY_EXTENSION: &str = "jpg";

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionTarget {
    pub target_bytes: usize,
    pub hard_stop_bytes: usize,
    pub max_dimension: u32,
    pub min_dimension: u32,
    pub shrink_factor: f64,
    pub quality_ladder: Vec<f32>,
}

impl Default for CompressionTarget {
    fn default() -> Self {
        Self {
            target_bytes: 3_500_000,
            hard_stop_bytes: 4_500_000,
            max_dimension: 2048,
            min_dimension: 800,
            shrink_factor: 0.75,
            quality_ladder: vec![0.82, 0.72, 0.62],
        }
    }
}

impl CompressionTarget {
    pub fn validate(&self) -> Result<()> {
        if self.target_bytes == 0 || self.hard_stop_bytes <= self.target_bytes {
            return Err(PipelineError::Configuration(format!(
                "compression budget requires hard stop > target > 0 (target {}, hard stop {})",
                self.target_bytes, self.hard_stop_bytes
            )));
        }
        if self.max_dimension == 0 || self.min_dimension == 0 {
            return Err(PipelineError::Configuration(
                "compression dimensions must be positive".to_string(),
            ));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor < 1.0) {
            return Err(PipelineError::Configuration(format!(
                "shrink factor must be between 0 and 1 (got {})",
                self.shrink_factor
            )));
        }
        if self.quality_ladder.is_empty()
            || self
                .quality_ladder
                .iter()
                .any(|quality| !(*quality > 0.0 && *quality <= 1.0))
        {
            return Err(PipelineError::Configuration(
                "quality ladder must be non-empty with values in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    pub fn exceeds_hard_stop(&self, asset: &MediaAsset) -> bool {
        asset.byte_len() > self.hard_stop_bytes
    }

    pub fn dimension_schedule(&self) -> Vec<u32> {
        let mut schedule = vec![self.max_dimension];
        let mut current = self.max_dimension;
        while current > self.min_dimension {
            let shrunk = (f64::from(current) * self.shrink_factor).floor() as u32;
            let next = shrunk.max(self.min_dimension);
            if next >= current {
                break;
            }
            schedule.push(next);
            current = next;
        }
        schedule
    }
}

/// Shrinks `asset` towards `target.target_bytes`.
pub fn compress(asset: MediaAsset, target: &CompressionTarget) -> Result<MediaAsset> {
    target.validate()?;
    if asset.byte_len() <= target.target_bytes {
        debug!(
            source = asset.source_name(),
            bytes = asset.byte_len(),
            "asset within budget; skipping re-encode"
        );
        return Ok(asset);
    }

    let decoded = image::load_from_memory(asset.bytes()).map_err(|source| PipelineError::Decode {
        source_name: asset.source_name().to_string(),
        source,
    })?;
    let surface = flatten_onto_white(&decoded);
    let mut best: Option<Vec<u8>> = None;

    'rounds: for (round, bounding_box) in target.dimension_schedule().into_iter().enumerate() {
        let (width, height) = scaled_dimensions(surface.width(), surface.height(), bounding_box);
        let resized = if (width, height) == (surface.width(), surface.height()) {
            Cow::Borrowed(&surface)
        } else {
            Cow::Owned(imageops::resize(&surface, width, height, FilterType::Triangle))
        };

        for &quality in &target.quality_ladder {
            let encoded = encode_jpeg(&resized, quality).map_err(|source| PipelineError::Encode {
                source_name: asset.source_name().to_string(),
                source,
            })?;
            debug!(
                source = asset.source_name(),
                round,
                width,
                height,
                quality,
                bytes = encoded.len(),
                "lossy encode attempt"
            );
            let fits = encoded.len() <= target.target_bytes;
            if best
                .as_ref()
                .map_or(true, |current| encoded.len() < current.len())
            {
                best = Some(encoded);
            }
            if fits {
                break 'rounds;
            }
        }
    }

    let bytes = best.ok_or_else(|| {
        PipelineError::Configuration("quality ladder produced no encodings".to_string())
    })?;
    info!(
        source = asset.source_name(),
        before = asset.byte_len(),
        after = bytes.len(),
        within_budget = bytes.len() <= target.target_bytes,
        "compressed asset"
    );
    Ok(MediaAsset::new(
        bytes,
        LOSSY_MIME,
        with_extension(asset.source_name(), LOSSY_EXTENSION),
    ))
}

pub fn scaled_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32) {
    let longest = width.max(height).max(1);
    let scale = (f64::from(max_dimension) / f64::from(longest)).min(1.0);
    let scaled = |side: u32| ((f64::from(side) * scale).round() as u32).max(1);
    (scaled(width), scaled(height))
}

fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let mut flattened = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u16::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
        };
        flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }
    flattened
}

fn encode_jpeg(surface: &RgbImage, quality: f32) -> std::result::Result<Vec<u8>, image::ImageError> {
    let percent = (quality * 100.0).round().clamp(1.0, 100.0) as u8;
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut bytes, percent);
    encoder.encode_image(surface)?;
    Ok(bytes)
}
