//! RGBA image strategies backed by the `image` crate.

use super::{ResourceDecoder, ResourceEncoder, Transformation};
use crate::error::DecodeError;
use crate::resource::{transcode_as_self, Resource};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::io::{Cursor, Write};
use tracing::{trace, warn};

/// Bytes per RGBA pixel.
const BYTES_PER_PIXEL: usize = 4;

transcode_as_self!(RgbaImage);

fn image_resource(image: RgbaImage) -> Resource<RgbaImage> {
    let size = image.width() as usize * image.height() as usize * BYTES_PER_PIXEL;
    Resource::new(image, size)
}

/// Largest dimensions with the aspect ratio of `(width, height)` that fit in
/// `(max_width, max_height)`. A zero bound leaves that axis unconstrained.
fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let scale_w = if max_width == 0 { f64::INFINITY } else { max_width as f64 / width as f64 };
    let scale_h = if max_height == 0 { f64::INFINITY } else { max_height as f64 / height as f64 };
    let scale = scale_w.min(scale_h);
    if !scale.is_finite() {
        return (width, height);
    }
    let fitted_w = ((width as f64 * scale).round() as u32).max(1);
    let fitted_h = ((height as f64 * scale).round() as u32).max(1);
    (fitted_w, fitted_h)
}

/// Decodes PNG or JPEG data, downsampling anything larger than the target.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageDecoder;

impl ResourceDecoder<Vec<u8>, RgbaImage> for ImageDecoder {
    fn decode(
        &self,
        data: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Result<Option<Resource<RgbaImage>>, DecodeError> {
        let decoded = image::load_from_memory(&data)
            .map_err(|e| DecodeError::InvalidData(e.to_string()))?
            .to_rgba8();

        let (fitted_w, fitted_h) = fit_within(decoded.width(), decoded.height(), width, height);
        let image = if fitted_w < decoded.width() || fitted_h < decoded.height() {
            trace!(
                from_width = decoded.width(),
                from_height = decoded.height(),
                to_width = fitted_w,
                to_height = fitted_h,
                "Downsampling decoded image"
            );
            imageops::resize(&decoded, fitted_w, fitted_h, FilterType::Triangle)
        } else {
            decoded
        };

        Ok(Some(image_resource(image)))
    }

    fn id(&self) -> &str {
        "resloader.ImageDecoder"
    }
}

/// Writes resources as PNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageEncoder;

impl ResourceEncoder<RgbaImage> for ImageEncoder {
    fn encode(&self, resource: &Resource<RgbaImage>, sink: &mut dyn Write) -> bool {
        let mut cursor = Cursor::new(Vec::new());
        if let Err(e) = resource.get().write_to(&mut cursor, image::ImageFormat::Png) {
            warn!(error = %e, "PNG encode failed");
            return false;
        }
        match sink.write_all(cursor.get_ref()) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to write encoded image");
                false
            }
        }
    }

    fn id(&self) -> &str {
        "resloader.ImageEncoder.png"
    }
}

/// Scales an image to fit inside the target box, keeping its aspect ratio.
///
/// An image that already fits exactly is returned unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct FitCenter;

impl Transformation<RgbaImage> for FitCenter {
    fn transform(&self, resource: Resource<RgbaImage>, width: u32, height: u32) -> Resource<RgbaImage> {
        let scaled = {
            let image = resource.get();
            let (fitted_w, fitted_h) = fit_within(image.width(), image.height(), width, height);
            if (fitted_w, fitted_h) == (image.width(), image.height()) {
                None
            } else {
                Some(imageops::resize(&*image, fitted_w, fitted_h, FilterType::Triangle))
            }
        };

        match scaled {
            Some(image) => image_resource(image),
            None => resource,
        }
    }

    fn id(&self) -> &str {
        "resloader.FitCenter"
    }
}
