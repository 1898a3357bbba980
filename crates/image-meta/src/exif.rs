//! EXIF extraction via rexif.
//!
//! rexif understands JPEG and TIFF containers. Anything else, and JPEGs
//! without an EXIF segment, are reported as "no EXIF" rather than an error.

use crate::orientation::Orientation;
use chrono::{DateTime, NaiveDateTime, Utc};
use rexif::{ExifError, ExifTag, TagValue};
use std::collections::BTreeMap;
use tracing::debug;

/// Fields pulled out of an EXIF block.
#[derive(Debug, Default)]
pub(crate) struct ExifFields {
    pub orientation: Option<Orientation>,
    pub capture_time: Option<DateTime<Utc>>,
    pub tags: BTreeMap<String, String>,
}

/// Outcome of an EXIF parse attempt.
#[derive(Debug)]
pub(crate) enum ExifOutcome {
    Found(ExifFields),
    /// Container format without EXIF support, or no EXIF segment present.
    Absent,
    Failed(String),
}

pub(crate) fn read_exif(raw: &[u8]) -> ExifOutcome {
    let (result, warnings) = rexif::parse_buffer_quiet(raw);
    for warning in warnings {
        debug!("exif: {}", warning);
    }

    let data = match result {
        Ok(data) => data,
        Err(ExifError::FileTypeUnknown) | Err(ExifError::JpegWithoutExif(_)) => {
            return ExifOutcome::Absent
        }
        Err(e) => return ExifOutcome::Failed(e.to_string()),
    };

    let mut fields = ExifFields::default();
    for entry in &data.entries {
        if entry.tag == ExifTag::UnknownToMe || entry.tag == ExifTag::MakerNote {
            continue;
        }

        match entry.tag {
            ExifTag::Orientation => {
                fields.orientation = first_u16(&entry.value).and_then(Orientation::from_exif);
            }
            ExifTag::DateTimeOriginal => {
                if let TagValue::Ascii(ref s) = entry.value {
                    fields.capture_time = parse_capture_time(s);
                }
            }
            _ => {}
        }

        let value = entry.value_more_readable.trim();
        if !value.is_empty() {
            fields.tags.insert(format!("{:?}", entry.tag), value.to_string());
        }
    }

    ExifOutcome::Found(fields)
}

fn first_u16(value: &TagValue) -> Option<u16> {
    match value {
        TagValue::U16(values) => values.first().copied(),
        TagValue::U8(values) => values.first().copied().map(u16::from),
        TagValue::U32(values) => values.first().and_then(|v| u16::try_from(*v).ok()),
        _ => None,
    }
}

/// Parse an EXIF `DateTimeOriginal` string ("YYYY:MM:DD HH:MM:SS").
pub(crate) fn parse_capture_time(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim_end_matches('\0').trim();
    let naive_dt = NaiveDateTime::parse_from_str(trimmed, "%Y:%m:%d %H:%M:%S").ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive_dt, Utc))
}
