//! Error types for thumbnail generation and caching.
//!
//! [`ThumbError`] is returned to callers and means no thumbnail was produced.
//! [`CacheError`] covers everything the cache absorbs: these are handed to the
//! cache's error handler and never fail a lookup.

use crate::record::RecordError;
use kv_store::KvError;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors: the request produced no thumbnail.
#[derive(Debug, Error)]
pub enum ThumbError {
    /// The source file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading image data from a stream failed.
    #[error("failed to read image data: {0}")]
    Io(#[source] std::io::Error),

    /// The requested bounding box has a zero edge.
    #[error("invalid thumbnail box {width}x{height}")]
    EmptyBox { width: u32, height: u32 },

    /// The source decoded to an image with no pixels.
    #[error("source image is empty ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// The source bytes are not a decodable image.
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    /// The thumbnail could not be encoded as JPEG.
    #[error("failed to encode thumbnail: {0}")]
    Encode(#[source] image::ImageError),

    /// The external encoder did not produce a thumbnail.
    #[error("external encoder failed: {0}")]
    External(String),

    /// An internal invariant was violated. Indicates a bug, not bad input.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

pub type Result<T> = std::result::Result<T, ThumbError>;

/// Non-fatal errors reported through the cache's error handler.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store failed for a reason other than a missing key.
    #[error("store error on {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: KvError,
    },

    /// A stored thumbnail record failed validation.
    #[error("corrupt thumbnail record {key}: {source}")]
    CorruptRecord {
        key: String,
        #[source]
        source: RecordError,
    },

    /// A stored metadata record could not be deserialized.
    #[error("corrupt metadata record {key}: {source}")]
    CorruptMetadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Metadata of a fresh thumbnail could not be serialized.
    #[error("failed to serialize metadata for {key}: {source}")]
    EncodeMetadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The absolute form of the requested path could not be determined.
    #[error("cannot resolve absolute path of {}: {source}", path.display())]
    Canonicalize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A generated thumbnail had no JPEG bytes to store.
    #[error("cannot store thumbnail {key}: {source}")]
    Thumbnail {
        key: String,
        #[source]
        source: ThumbError,
    },
}
