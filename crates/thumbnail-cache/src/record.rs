//! Binary layout of a stored thumbnail.
//!
//! ```text
//! uvarint(width) || uvarint(height) || JPEG bytes
//! ```
//!
//! Varints are unsigned LEB128: seven payload bits per byte, least
//! significant group first, high bit set on every byte but the last. The JPEG
//! is simply the rest of the record.

use thiserror::Error;

/// Longest encoding of a `u64`.
const MAX_VARINT_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("truncated {0} varint")]
    Truncated(&'static str),

    #[error("{0} varint overflows 64 bits")]
    Overflow(&'static str),

    #[error("{field} {value} exceeds bound {max}")]
    OutOfBounds {
        field: &'static str,
        value: u64,
        max: u32,
    },
}

/// A decoded thumbnail record borrowing its JPEG bytes from the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbRecord<'a> {
    pub width: u32,
    pub height: u32,
    pub jpeg: &'a [u8],
}

impl<'a> ThumbRecord<'a> {
    /// Decode a record, rejecting dimensions larger than the box it was
    /// stored under.
    pub fn decode(raw: &'a [u8], max_width: u32, max_height: u32) -> Result<Self, RecordError> {
        let (width, nw) = read_uvarint(raw, "width")?;
        let width = check_bound("width", width, max_width)?;

        let (height, nh) = read_uvarint(&raw[nw..], "height")?;
        let height = check_bound("height", height, max_height)?;

        Ok(Self {
            width,
            height,
            jpeg: &raw[nw + nh..],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 * MAX_VARINT_LEN + self.jpeg.len());
        put_uvarint(&mut out, u64::from(self.width));
        put_uvarint(&mut out, u64::from(self.height));
        out.extend_from_slice(self.jpeg);
        out
    }
}

fn check_bound(field: &'static str, value: u64, max: u32) -> Result<u32, RecordError> {
    if value > u64::from(max) {
        return Err(RecordError::OutOfBounds { field, value, max });
    }
    // value <= max <= u32::MAX
    Ok(value as u32)
}

/// Append the unsigned LEB128 encoding of `value` to `out`.
pub fn put_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Read an unsigned LEB128 value from the front of `buf`.
///
/// Returns the value and the number of bytes consumed.
pub fn read_uvarint(buf: &[u8], field: &'static str) -> Result<(u64, usize), RecordError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(RecordError::Overflow(field));
        }
        if byte < 0x80 {
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(RecordError::Overflow(field));
            }
            return Ok((value | (u64::from(byte) << shift), i + 1));
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    Err(RecordError::Truncated(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint(value: u64) -> Vec<u8> {
        let mut out = Vec::new();
        put_uvarint(&mut out, value);
        out
    }

    #[test]
    fn test_varint_known_encodings() {
        assert_eq!(varint(0), vec![0x00]);
        assert_eq!(varint(1), vec![0x01]);
        assert_eq!(varint(127), vec![0x7f]);
        assert_eq!(varint(128), vec![0x80, 0x01]);
        assert_eq!(varint(300), vec![0xac, 0x02]);
        assert_eq!(varint(u64::MAX).len(), MAX_VARINT_LEN);
        assert_eq!(read_uvarint(&varint(u64::MAX), "w").unwrap(), (u64::MAX, 10));
    }

    #[test]
    fn test_varint_errors() {
        assert_eq!(read_uvarint(&[], "width"), Err(RecordError::Truncated("width")));
        assert_eq!(read_uvarint(&[0x80, 0x80], "width"), Err(RecordError::Truncated("width")));
        assert_eq!(read_uvarint(&[0xff; 11], "width"), Err(RecordError::Overflow("width")));
        let mut too_big = vec![0xff; 9];
        too_big.push(0x02);
        assert_eq!(read_uvarint(&too_big, "width"), Err(RecordError::Overflow("width")));
    }

    #[test]
    fn test_record_layout() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xD9];
        let record = ThumbRecord {
            width: 200,
            height: 150,
            jpeg: &jpeg,
        };
        let raw = record.encode();
        assert_eq!(raw, vec![0xc8, 0x01, 0x96, 0x01, 0xFF, 0xD8, 0xFF, 0xD9]);

        let decoded = ThumbRecord::decode(&raw, 200, 200).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_record_rejects_oversized_dimensions() {
        let raw = ThumbRecord {
            width: 200,
            height: 150,
            jpeg: b"x",
        }
        .encode();

        assert!(matches!(
            ThumbRecord::decode(&raw, 100, 200),
            Err(RecordError::OutOfBounds { field: "width", value: 200, max: 100 })
        ));
        assert!(matches!(
            ThumbRecord::decode(&raw, 200, 149),
            Err(RecordError::OutOfBounds { field: "height", .. })
        ));
    }

    #[test]
    fn test_record_rejects_truncation() {
        assert_eq!(
            ThumbRecord::decode(&[], 10, 10),
            Err(RecordError::Truncated("width"))
        );
        assert_eq!(
            ThumbRecord::decode(&[0x05], 10, 10),
            Err(RecordError::Truncated("height"))
        );
    }

    #[test]
    fn test_record_with_empty_jpeg() {
        let decoded = ThumbRecord::decode(&[0x01, 0x01], 1, 1).unwrap();
        assert_eq!((decoded.width, decoded.height), (1, 1));
        assert!(decoded.jpeg.is_empty());
    }
}
