//! Persistent JPEG thumbnail cache.
//!
//! Given an image path and a bounding box, [`Cache::lookup`] returns a JPEG
//! thumbnail that fits the box together with the source image's metadata.
//! Thumbnails are generated once and stored in a key-value store, keyed by
//! the absolute source path and the box, so later requests skip decoding and
//! scaling entirely.
//!
//! # Storage layout
//!
//! Two records per source image:
//! - `thumb|<abs path>|<max w>|<max h>`: `uvarint(w) uvarint(h) jpeg…`
//! - `meta|<abs path>`: metadata as JSON, shared by every box size
//!
//! Keys are joined with `|`, so a path containing `|` followed by digits can
//! collide with another path's key. Such paths are not supported.
//!
//! # Errors
//!
//! Only generation failures reach the caller. Store failures and corrupt
//! records are handed to the cache's error handler and treated as misses.

pub mod cache;
pub mod encoder;
pub mod error;
pub mod generate;
pub mod record;
pub mod thumb;

pub use cache::{meta_key, thumb_key, Cache, ErrorHandler};
pub use encoder::EncoderKind;
pub use error::{CacheError, Result, ThumbError};
pub use generate::{fit_size, generate_file, generate_from_bytes, generate_from_reader};
pub use image_meta::{Metadata, Orientation};
pub use kv_store::{KeyValue, KvError, MemoryKeyValue, SqliteKeyValue};
pub use thumb::Thumbnail;

use serde::{Deserialize, Serialize};

/// JPEG quality used when none is configured.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Settings for thumbnail generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// JPEG quality of generated thumbnails (1-100).
    pub jpeg_quality: u8,
    pub encoder: EncoderKind,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            encoder: EncoderKind::Builtin,
        }
    }
}
