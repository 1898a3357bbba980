//! Thumbnail generation pipeline.
//!
//! Decode the source, read its metadata, fit it into the requested box
//! (accounting for orientations that swap width and height), scale with a
//! bilinear filter onto a white canvas, re-orient for display, then encode
//! as JPEG.

use crate::encoder::{self, EncoderKind};
use crate::error::{Result, ThumbError};
use crate::thumb::Thumbnail;
use crate::ThumbnailConfig;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, Rgba, RgbaImage};
use image_meta::Metadata;
use std::fs;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Generate a thumbnail of the file at `path`, without caching.
pub fn generate_file(
    path: &Path,
    max_width: u32,
    max_height: u32,
    config: &ThumbnailConfig,
) -> Result<Thumbnail> {
    check_box(max_width, max_height)?;
    let raw = fs::read(path).map_err(|source| ThumbError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    if let EncoderKind::External { program } = &config.encoder {
        match encoder::run_external(program, path, max_width, max_height) {
            Ok(out) => {
                debug!("external encoder produced {}x{} for {}", out.width, out.height, path.display());
                return Ok(Thumbnail::from_jpeg(out.jpeg, out.width, out.height, read_metadata(&raw)));
            }
            Err(e) => warn!("{}; falling back to built-in encoder", e),
        }
    }

    generate_from_bytes(&raw, max_width, max_height, config)
}

/// Generate a thumbnail from a stream of image bytes, without caching.
///
/// Always uses the built-in encoder: there is no file to hand to a program.
pub fn generate_from_reader<R: Read>(
    mut reader: R,
    max_width: u32,
    max_height: u32,
    config: &ThumbnailConfig,
) -> Result<Thumbnail> {
    let mut raw = Vec::new();
    reader.read_to_end(&mut raw).map_err(ThumbError::Io)?;
    generate_from_bytes(&raw, max_width, max_height, config)
}

/// Generate a thumbnail from the raw bytes of an image file.
pub fn generate_from_bytes(
    raw: &[u8],
    max_width: u32,
    max_height: u32,
    config: &ThumbnailConfig,
) -> Result<Thumbnail> {
    check_box(max_width, max_height)?;
    let source = image::load_from_memory(raw).map_err(ThumbError::Decode)?;
    let (width, height) = source.dimensions();
    if width == 0 || height == 0 {
        return Err(ThumbError::EmptyImage { width, height });
    }
    let metadata = read_metadata(raw);
    render(&source, metadata, max_width, max_height, config.jpeg_quality)
}

fn render(
    source: &DynamicImage,
    metadata: Metadata,
    max_width: u32,
    max_height: u32,
    quality: u8,
) -> Result<Thumbnail> {
    let orientation = metadata.orientation;
    // size before re-orientation, so the displayed result fits the box
    let (box_w, box_h) = if orientation.is_transpose() {
        (max_height, max_width)
    } else {
        (max_width, max_height)
    };

    let (width, height) = fit_size(source.dimensions(), box_w, box_h);
    let scaled = scale_onto_white(source, width, height);
    let oriented = orientation.apply(scaled);

    let thumb = Thumbnail::from_image(oriented, metadata, quality);
    thumb.jpeg()?;
    Ok(thumb)
}

pub(crate) fn check_box(max_width: u32, max_height: u32) -> Result<()> {
    if max_width == 0 || max_height == 0 {
        return Err(ThumbError::EmptyBox {
            width: max_width,
            height: max_height,
        });
    }
    Ok(())
}

/// Metadata of the source, or empty metadata if it has none or is unreadable.
fn read_metadata(raw: &[u8]) -> Metadata {
    match image_meta::parse(raw) {
        Ok(metadata) => metadata,
        Err(e) if e.is_unknown_format() => Metadata::default(),
        Err(e) => {
            warn!("metadata: {}", e);
            Metadata::default()
        }
    }
}

/// Largest size with the source aspect ratio that fits `max_width`x`max_height`.
///
/// Never upscales. One edge equals the box edge unless the source already fits.
/// A source with a zero edge has no size to fit and yields `(0, 0)`.
pub fn fit_size((src_w, src_h): (u32, u32), max_width: u32, max_height: u32) -> (u32, u32) {
    if src_w == 0 || src_h == 0 {
        return (0, 0);
    }
    if src_w <= max_width && src_h <= max_height {
        return (src_w, src_h);
    }

    let w = u64::from(src_w) * u64::from(max_height) / u64::from(src_h);
    if w <= u64::from(max_width) {
        return ((w as u32).max(1), max_height);
    }
    let h = u64::from(src_h) * u64::from(max_width) / u64::from(src_w);
    (max_width, (h as u32).max(1))
}

/// Bilinear scale of `source` into a white canvas of exactly `width`x`height`.
fn scale_onto_white(source: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    let rgba = source.to_rgba8();
    let scaled = if rgba.dimensions() == (width, height) {
        rgba
    } else {
        imageops::resize(&rgba, width, height, FilterType::Triangle)
    };

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    imageops::overlay(&mut canvas, &scaled, 0, 0);
    DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
}
