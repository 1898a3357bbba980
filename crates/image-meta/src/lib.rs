//! Image metadata extraction for thumbnails.
//!
//! Pulls the display orientation, capture time and a flat tag map out of the
//! raw bytes of an image file. EXIF is read first; an embedded XMP packet
//! fills in whatever EXIF did not provide.

mod exif;
pub mod orientation;
mod xmp;

pub use orientation::Orientation;

use chrono::{DateTime, Utc};
use exif::ExifOutcome;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MetaError {
    /// The container format carries no metadata this crate can read.
    #[error("no metadata found for this image format")]
    UnknownFormat,

    #[error("EXIF error: {0}")]
    Exif(String),

    #[error("XMP error: {0}")]
    Xmp(#[from] roxmltree::Error),

    #[error("XMP packet is not valid UTF-8: {0}")]
    XmpEncoding(#[from] std::str::Utf8Error),

    #[error("invalid orientation value: {0}")]
    InvalidOrientation(u16),
}

impl MetaError {
    /// True when parsing failed only because there was nothing to parse.
    pub fn is_unknown_format(&self) -> bool {
        matches!(self, MetaError::UnknownFormat)
    }
}

/// Metadata of a source image, independent of any thumbnail size.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub orientation: Orientation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capture_time: Option<DateTime<Utc>>,
    /// EXIF tags keyed by tag name, XMP properties keyed by `prefix:name`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.orientation == Orientation::Normal
            && self.capture_time.is_none()
            && self.tags.is_empty()
    }
}

/// Parse metadata from the raw bytes of an image file.
///
/// Returns [`MetaError::UnknownFormat`] when neither EXIF nor XMP is present.
/// An EXIF failure is only returned if no XMP packet could stand in for it.
pub fn parse(raw: &[u8]) -> Result<Metadata, MetaError> {
    let mut exif_error = None;
    let mut exif_has_orientation = false;
    let mut meta = None;

    match exif::read_exif(raw) {
        ExifOutcome::Found(fields) => {
            exif_has_orientation = fields.orientation.is_some();
            meta = Some(Metadata {
                orientation: fields.orientation.unwrap_or_default(),
                capture_time: fields.capture_time,
                tags: fields.tags,
            });
        }
        ExifOutcome::Absent => {}
        ExifOutcome::Failed(e) => exif_error = Some(MetaError::Exif(e)),
    }

    let xmp = match xmp::read_xmp(raw) {
        Ok(xmp) => xmp,
        Err(e) if meta.is_some() => {
            debug!("ignoring unreadable XMP packet: {}", e);
            None
        }
        Err(e) => return Err(e),
    };

    if let Some(xmp) = xmp {
        let meta = meta.get_or_insert_with(Metadata::default);
        if !exif_has_orientation {
            if let Some(orientation) = xmp.orientation {
                meta.orientation = orientation;
            }
        }
        for (key, value) in xmp.tags {
            meta.tags.entry(key).or_insert(value);
        }
    }

    match (meta, exif_error) {
        (Some(meta), _) => Ok(meta),
        (None, Some(e)) => Err(e),
        (None, None) => Err(MetaError::UnknownFormat),
    }
}
