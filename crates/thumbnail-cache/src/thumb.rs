//! The thumbnail value handed back to callers.
//!
//! A thumbnail is born either as JPEG bytes (loaded from the store) or as a
//! decoded image (freshly generated). The other view is produced on first
//! request and kept, so repeated calls are free. Each value has its own lock;
//! concurrent readers never convert twice.

use crate::error::{Result, ThumbError};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use image_meta::Metadata;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

enum Repr {
    Jpeg(Arc<[u8]>),
    Image(Arc<DynamicImage>),
    Both {
        jpeg: Arc<[u8]>,
        image: Arc<DynamicImage>,
    },
}

/// A JPEG thumbnail with the metadata of its source image.
pub struct Thumbnail {
    width: u32,
    height: u32,
    metadata: Metadata,
    quality: u8,
    repr: Mutex<Repr>,
}

impl Thumbnail {
    /// Wrap already-encoded JPEG bytes whose dimensions are known.
    pub fn from_jpeg(jpeg: impl Into<Arc<[u8]>>, width: u32, height: u32, metadata: Metadata) -> Self {
        Self {
            width,
            height,
            metadata,
            quality: crate::DEFAULT_JPEG_QUALITY,
            repr: Mutex::new(Repr::Jpeg(jpeg.into())),
        }
    }

    /// Wrap a decoded image; it is encoded at `quality` when bytes are first requested.
    pub fn from_image(image: DynamicImage, metadata: Metadata, quality: u8) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            metadata,
            quality,
            repr: Mutex::new(Repr::Image(Arc::new(image))),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Metadata of the source image (not of the thumbnail).
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// JPEG-encoded thumbnail, encoding the decoded image on first call.
    pub fn jpeg(&self) -> Result<Arc<[u8]>> {
        let mut repr = self.repr.lock();
        let image = match &*repr {
            Repr::Jpeg(jpeg) | Repr::Both { jpeg, .. } => return Ok(Arc::clone(jpeg)),
            Repr::Image(image) => Arc::clone(image),
        };

        if image.width() == 0 || image.height() == 0 {
            return Err(ThumbError::Internal("thumbnail has neither JPEG bytes nor pixels"));
        }
        let jpeg: Arc<[u8]> = encode_jpeg(&image, self.quality)?.into();
        *repr = Repr::Both {
            jpeg: Arc::clone(&jpeg),
            image,
        };
        Ok(jpeg)
    }

    /// Decoded thumbnail, decoding the JPEG bytes on first call.
    pub fn image(&self) -> Result<Arc<DynamicImage>> {
        let mut repr = self.repr.lock();
        let jpeg = match &*repr {
            Repr::Image(image) | Repr::Both { image, .. } => return Ok(Arc::clone(image)),
            Repr::Jpeg(jpeg) => Arc::clone(jpeg),
        };

        if jpeg.is_empty() {
            return Err(ThumbError::Internal("thumbnail has neither JPEG bytes nor pixels"));
        }
        let image = Arc::new(image::load_from_memory(&jpeg).map_err(ThumbError::Decode)?);
        *repr = Repr::Both {
            jpeg,
            image: Arc::clone(&image),
        };
        Ok(image)
    }
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match &*self.repr.lock() {
            Repr::Jpeg(_) => "jpeg",
            Repr::Image(_) => "image",
            Repr::Both { .. } => "both",
        };
        f.debug_struct("Thumbnail")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("metadata", &self.metadata)
            .field("repr", &repr)
            .finish()
    }
}

/// Encode `image` as a baseline JPEG at `quality` (1-100).
pub(crate) fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    let written = match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => image.write_with_encoder(encoder),
        // JPEG has no alpha channel
        _ => DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder),
    };
    written.map_err(ThumbError::Encode)?;
    Ok(buffer)
}
