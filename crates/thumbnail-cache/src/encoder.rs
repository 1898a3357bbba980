//! Thumbnail encoder strategies.
//!
//! The built-in encoder decodes and scales in-process. The external encoder
//! shells out to an ImageMagick-compatible `convert` program and reads the
//! finished JPEG from its stdout; the choice is fixed when the cache or
//! generator is configured.

use crate::error::{Result, ThumbError};
use image::ImageReader;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Which encoder produces thumbnails.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncoderKind {
    /// Decode, scale and encode in-process.
    #[default]
    Builtin,
    /// Run `program <path> -auto-orient -thumbnail 'WxH>' jpg:-`.
    External { program: PathBuf },
}

/// JPEG bytes and displayed dimensions produced by an external program.
#[derive(Debug)]
pub(crate) struct ExternalOutput {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Run the external encoder on `path`.
///
/// The program auto-orients, so the reported dimensions are already the
/// displayed ones. They are read back from the JPEG header.
pub(crate) fn run_external(
    program: &Path,
    path: &Path,
    max_width: u32,
    max_height: u32,
) -> Result<ExternalOutput> {
    let output = Command::new(program)
        .arg(path)
        .arg("-auto-orient")
        .arg("-thumbnail")
        // '>' only shrinks; sources already inside the box keep their size
        .arg(format!("{}x{}>", max_width, max_height))
        .arg("jpg:-")
        .stdin(Stdio::null())
        .output()
        .map_err(|e| ThumbError::External(format!("failed to run {}: {}", program.display(), e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ThumbError::External(format!(
            "{} exited with {}: {}",
            program.display(),
            output.status,
            stderr.trim()
        )));
    }

    if output.stdout.is_empty() {
        return Err(ThumbError::External(format!(
            "{} produced no output for {}",
            program.display(),
            path.display()
        )));
    }

    let (width, height) = ImageReader::with_format(Cursor::new(&output.stdout), image::ImageFormat::Jpeg)
        .into_dimensions()
        .map_err(ThumbError::Decode)?;
    if width > max_width || height > max_height {
        return Err(ThumbError::External(format!(
            "{} returned {}x{} for box {}x{}",
            program.display(),
            width,
            height,
            max_width,
            max_height
        )));
    }

    Ok(ExternalOutput {
        jpeg: output.stdout,
        width,
        height,
    })
}
