/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! FIX frame codec.
//!
//! Splits a TCP byte stream into complete `8=...|9=...|...|10=ccc|` frames.
//! Partial frames stay in the source buffer until the rest arrives; the codec
//! never looks past the frame boundary, so message content stays opaque.

use bytes::{BufMut, Bytes, BytesMut};
use memchr::memchr;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// SOH delimiter.
pub const SOH: u8 = 0x01;

/// Length of the `10=ccc|` trailer.
const TRAILER_LEN: usize = 7;

/// Default upper bound for a single frame.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Errors that can occur while framing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Frame does not start with `8=`.
    #[error("invalid begin string: frame must start with 8=")]
    InvalidBeginString,

    /// Second field is not BodyLength.
    #[error("missing body length field (tag 9)")]
    MissingBodyLength,

    /// BodyLength is not a decimal number.
    #[error("invalid body length value")]
    InvalidBodyLength,

    /// The bytes where the checksum should be are not `10=ccc<SOH>`.
    #[error("invalid trailer: expected 10=ccc at offset {offset}")]
    InvalidTrailer {
        /// Offset of the trailer within the frame.
        offset: usize,
    },

    /// Checksum mismatch.
    #[error("checksum mismatch: calculated {calculated}, declared {declared}")]
    ChecksumMismatch {
        /// Calculated checksum.
        calculated: u8,
        /// Declared checksum in the frame.
        declared: u8,
    },

    /// Frame exceeds the configured maximum size.
    #[error("message too large: {size} bytes exceeds maximum {max_size}")]
    MessageTooLarge {
        /// Size of the frame (or of the buffered prefix).
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// A field is not in `tag=value<SOH>` form.
    #[error("malformed field at offset {offset}")]
    MalformedField {
        /// Offset of the field within the frame.
        offset: usize,
    },

    /// A required header field is missing.
    #[error("missing required field: tag {tag}")]
    MissingField {
        /// Tag of the missing field.
        tag: u32,
    },

    /// I/O error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Sum of all bytes modulo 256.
#[inline]
#[must_use]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Parses a 3-digit checksum value.
#[inline]
#[must_use]
pub fn parse_checksum(bytes: &[u8]) -> Option<u8> {
    let [d0, d1, d2] = bytes else {
        return None;
    };
    if !(d0.is_ascii_digit() && d1.is_ascii_digit() && d2.is_ascii_digit()) {
        return None;
    }
    let value = u32::from(d0 - b'0') * 100 + u32::from(d1 - b'0') * 10 + u32::from(d2 - b'0');
    u8::try_from(value).ok()
}

/// Frame codec for the gateway's receive path.
#[derive(Debug, Clone)]
pub struct FixCodec {
    /// Maximum frame size in bytes.
    max_message_size: usize,
    /// Whether to validate checksums.
    validate_checksum: bool,
}

impl FixCodec {
    /// Creates a new codec with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            validate_checksum: true,
        }
    }

    /// Sets the maximum frame size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets whether to validate checksums.
    #[must_use]
    pub const fn with_checksum_validation(mut self, validate: bool) -> Self {
        self.validate_checksum = validate;
        self
    }

    /// Returns the maximum frame size.
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    fn too_large(&self, size: usize) -> Result<(), CodecError> {
        if size > self.max_message_size {
            return Err(CodecError::MessageTooLarge {
                size,
                max_size: self.max_message_size,
            });
        }
        Ok(())
    }
}

impl Default for FixCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FixCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }
        if &src[..2] != b"8=" {
            return Err(CodecError::InvalidBeginString);
        }

        let Some(first_soh) = memchr(SOH, src) else {
            self.too_large(src.len())?;
            return Ok(None);
        };

        let body_len_start = first_soh + 1;
        if src.len() < body_len_start + 2 {
            return Ok(None);
        }
        if &src[body_len_start..body_len_start + 2] != b"9=" {
            return Err(CodecError::MissingBodyLength);
        }

        let Some(pos) = memchr(SOH, &src[body_len_start..]) else {
            self.too_large(src.len())?;
            return Ok(None);
        };
        let body_len_soh = body_len_start + pos;

        let digits = &src[body_len_start + 2..body_len_soh];
        if digits.is_empty() || digits.len() > 9 || !digits.iter().all(u8::is_ascii_digit) {
            return Err(CodecError::InvalidBodyLength);
        }
        let body_length = digits
            .iter()
            .fold(0usize, |acc, &d| acc * 10 + usize::from(d - b'0'));

        // BodyLength counts from after 9=N| up to and including the SOH
        // before 10=.
        let total_length = body_len_soh + 1 + body_length + TRAILER_LEN;
        self.too_large(total_length)?;

        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        let trailer_start = total_length - TRAILER_LEN;
        if &src[trailer_start..trailer_start + 3] != b"10=" || src[total_length - 1] != SOH {
            return Err(CodecError::InvalidTrailer {
                offset: trailer_start,
            });
        }

        if self.validate_checksum {
            let declared = parse_checksum(&src[trailer_start + 3..total_length - 1])
                .ok_or(CodecError::InvalidTrailer {
                    offset: trailer_start,
                })?;
            let calculated = checksum(&src[..trailer_start]);
            if calculated != declared {
                return Err(CodecError::ChecksumMismatch {
                    calculated,
                    declared,
                });
            }
        }

        Ok(Some(src.split_to(total_length).freeze()))
    }
}

impl Encoder<&[u8]> for FixCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.too_large(item.len())?;
        dst.reserve(item.len());
        dst.put_slice(item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(body: &str) -> Vec<u8> {
        let header = format!("8=FIX.4.4\x019={}\x01", body.len());
        let without_checksum = format!("{}{}", header, body);
        let sum = checksum(without_checksum.as_bytes());
        format!("{}10={:03}\x01", without_checksum, sum).into_bytes()
    }

    #[test]
    fn test_checksum_wraps() {
        let data = vec![255u8; 1000];
        assert_eq!(checksum(&data), ((255u32 * 1000) % 256) as u8);
        assert_eq!(parse_checksum(b"042"), Some(42));
        assert_eq!(parse_checksum(b"256"), None);
        assert_eq!(parse_checksum(b"4a2"), None);
    }

    #[test]
    fn test_decode_complete_frame() {
        let mut codec = FixCodec::new();
        let frame = make_frame("35=0\x0134=1\x01");
        let mut buf = BytesMut::from(&frame[..]);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], &frame[..]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_is_buffered() {
        let mut codec = FixCodec::new();
        let frame = make_frame("35=0\x01");
        let mut buf = BytesMut::from(&frame[..frame.len() - 5]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), frame.len() - 5);

        buf.extend_from_slice(&frame[frame.len() - 5..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_two_frames_in_one_read() {
        let mut codec = FixCodec::new();
        let mut bytes = make_frame("35=0\x01");
        bytes.extend(make_frame("35=1\x01112=X\x01"));
        let mut buf = BytesMut::from(&bytes[..]);

        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_invalid_begin_string() {
        let mut codec = FixCodec::new();
        let mut buf = BytesMut::from(&b"9=FIX.4.4\x01"[..]);
        assert_eq!(codec.decode(&mut buf), Err(CodecError::InvalidBeginString));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut codec = FixCodec::new();
        let mut buf = BytesMut::from(&b"8=FIX.4.4\x019=5\x0135=0\x0110=000\x01"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_no_checksum_validation() {
        let mut codec = FixCodec::new().with_checksum_validation(false);
        let mut buf = BytesMut::from(&b"8=FIX.4.4\x019=5\x0135=0\x0110=000\x01"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_wrong_body_length_hits_trailer_check() {
        let mut codec = FixCodec::new();
        let mut buf = BytesMut::from(&b"8=FIX.4.4\x019=3\x0135=0\x0110=000\x01"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::InvalidTrailer { .. })
        ));
    }

    #[test]
    fn test_message_too_large() {
        let mut codec = FixCodec::new().with_max_message_size(32);
        let frame = make_frame("35=D\x0158=a long free text field\x01");
        let mut buf = BytesMut::from(&frame[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::MessageTooLarge { max_size: 32, .. })
        ));
    }

    #[test]
    fn test_unterminated_garbage_is_bounded() {
        let mut codec = FixCodec::new().with_max_message_size(16);
        let mut buf = BytesMut::from(&b"8=FIX.4.4 and no delimiter anywhere"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_encode_passes_bytes_through() {
        let mut codec = FixCodec::new();
        let frame = make_frame("35=0\x01");
        let mut dst = BytesMut::new();
        codec.encode(&frame[..], &mut dst).unwrap();
        assert_eq!(&dst[..], &frame[..]);
    }
}
