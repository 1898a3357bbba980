//! EXIF orientation values and the pixel transforms they imply.

use crate::MetaError;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// How a decoded image must be transformed to display upright.
///
/// Discriminants are the EXIF/TIFF `Orientation` tag values (1-8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Orientation {
    #[default]
    Normal = 1,
    FlipHorizontal = 2,
    Rotate180 = 3,
    FlipVertical = 4,
    /// Mirror across the top-left to bottom-right diagonal.
    Transpose = 5,
    /// Rotate 90° clockwise.
    Rotate90 = 6,
    /// Mirror across the top-right to bottom-left diagonal.
    Transverse = 7,
    /// Rotate 270° clockwise.
    Rotate270 = 8,
}

impl Orientation {
    /// Map an EXIF tag value to an orientation. Out-of-range values yield `None`.
    pub fn from_exif(value: u16) -> Option<Self> {
        match value {
            1 => Some(Orientation::Normal),
            2 => Some(Orientation::FlipHorizontal),
            3 => Some(Orientation::Rotate180),
            4 => Some(Orientation::FlipVertical),
            5 => Some(Orientation::Transpose),
            6 => Some(Orientation::Rotate90),
            7 => Some(Orientation::Transverse),
            8 => Some(Orientation::Rotate270),
            _ => None,
        }
    }

    pub fn to_exif(self) -> u16 {
        self as u16
    }

    /// True if applying this orientation swaps width and height.
    pub fn is_transpose(self) -> bool {
        matches!(
            self,
            Orientation::Transpose
                | Orientation::Rotate90
                | Orientation::Transverse
                | Orientation::Rotate270
        )
    }

    /// Transform `image` so it displays upright.
    pub fn apply(self, image: DynamicImage) -> DynamicImage {
        match self {
            Orientation::Normal => image,
            Orientation::FlipHorizontal => image.fliph(),
            Orientation::Rotate180 => image.rotate180(),
            Orientation::FlipVertical => image.flipv(),
            Orientation::Transpose => image.rotate90().fliph(),
            Orientation::Rotate90 => image.rotate90(),
            Orientation::Transverse => image.rotate270().fliph(),
            Orientation::Rotate270 => image.rotate270(),
        }
    }
}

impl From<Orientation> for u16 {
    fn from(orientation: Orientation) -> u16 {
        orientation.to_exif()
    }
}

impl TryFrom<u16> for Orientation {
    type Error = MetaError;

    fn try_from(value: u16) -> Result<Self, MetaError> {
        Orientation::from_exif(value).ok_or(MetaError::InvalidOrientation(value))
    }
}
