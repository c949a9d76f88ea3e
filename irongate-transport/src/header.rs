/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Standard header field access for framed messages.
//!
//! The gateway only needs a handful of header fields: MsgType to recognise a
//! Logon, the CompIDs to derive the session key and MsgSeqNum for the admin
//! view. Everything else is left to the owning library.

use crate::codec::{CodecError, SOH};
use irongate_core::types::{CompId, SeqNum};
use memchr::memchr;

/// BeginString.
pub const TAG_BEGIN_STRING: u32 = 8;
/// MsgSeqNum.
pub const TAG_MSG_SEQ_NUM: u32 = 34;
/// MsgType.
pub const TAG_MSG_TYPE: u32 = 35;
/// SenderCompID.
pub const TAG_SENDER_COMP_ID: u32 = 49;
/// SenderSubID.
pub const TAG_SENDER_SUB_ID: u32 = 50;
/// TargetCompID.
pub const TAG_TARGET_COMP_ID: u32 = 56;
/// TargetSubID.
pub const TAG_TARGET_SUB_ID: u32 = 57;
/// SenderLocationID.
pub const TAG_SENDER_LOCATION_ID: u32 = 142;
/// TargetLocationID.
pub const TAG_TARGET_LOCATION_ID: u32 = 143;

/// MsgType value of a Logon.
pub const MSG_TYPE_LOGON: &[u8] = b"A";

/// Iterator over the `tag=value` fields of a frame.
#[derive(Debug, Clone)]
pub struct Fields<'a> {
    input: &'a [u8],
    offset: usize,
}

impl<'a> Fields<'a> {
    /// Creates an iterator starting at the first byte of `input`.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, offset: 0 }
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = Result<(u32, &'a [u8]), CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.input.len() {
            return None;
        }
        let start = self.offset;
        let remaining = &self.input[start..];
        let malformed = CodecError::MalformedField { offset: start };

        let (Some(eq), Some(soh)) = (memchr(b'=', remaining), memchr(SOH, remaining)) else {
            self.offset = self.input.len();
            return Some(Err(malformed));
        };
        if eq == 0 || eq > soh {
            self.offset = self.input.len();
            return Some(Err(malformed));
        }
        let Some(tag) = parse_tag(&remaining[..eq]) else {
            self.offset = self.input.len();
            return Some(Err(malformed));
        };

        self.offset = start + soh + 1;
        Some(Ok((tag, &remaining[eq + 1..soh])))
    }
}

/// Returns the value of the first occurrence of `tag`, if any.
///
/// Malformed frames yield `None`.
#[must_use]
pub fn find_field(frame: &[u8], tag: u32) -> Option<&[u8]> {
    Fields::new(frame)
        .map_while(Result::ok)
        .find(|(t, _)| *t == tag)
        .map(|(_, value)| value)
}

/// Reads MsgSeqNum (34) from a frame.
#[must_use]
pub fn msg_seq_num(frame: &[u8]) -> Option<SeqNum> {
    find_field(frame, TAG_MSG_SEQ_NUM)
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(SeqNum::new)
}

/// Standard header of a framed message, as seen from the sender of the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// BeginString (8).
    pub begin_string: String,
    /// MsgType (35).
    pub msg_type: String,
    /// MsgSeqNum (34), if present and numeric.
    pub msg_seq_num: Option<SeqNum>,
    /// SenderCompID (49).
    pub sender_comp_id: CompId,
    /// TargetCompID (56).
    pub target_comp_id: CompId,
    /// SenderSubID (50).
    pub sender_sub_id: Option<String>,
    /// TargetSubID (57).
    pub target_sub_id: Option<String>,
    /// SenderLocationID (142).
    pub sender_location_id: Option<String>,
    /// TargetLocationID (143).
    pub target_location_id: Option<String>,
}

impl FrameHeader {
    /// Parses the header fields out of a complete frame.
    ///
    /// # Errors
    /// Returns `CodecError` if a field is malformed or BeginString, MsgType
    /// or either CompID is missing.
    pub fn parse(frame: &[u8]) -> Result<Self, CodecError> {
        let mut begin_string = None;
        let mut msg_type = None;
        let mut msg_seq_num = None;
        let mut sender_comp_id = None;
        let mut target_comp_id = None;
        let mut sender_sub_id = None;
        let mut target_sub_id = None;
        let mut sender_location_id = None;
        let mut target_location_id = None;

        for field in Fields::new(frame) {
            let (tag, value) = field?;
            let text = || String::from_utf8_lossy(value).into_owned();
            match tag {
                TAG_BEGIN_STRING => begin_string = Some(text()),
                TAG_MSG_TYPE => msg_type = Some(text()),
                TAG_MSG_SEQ_NUM => {
                    msg_seq_num = std::str::from_utf8(value)
                        .ok()
                        .and_then(|v| v.parse::<u64>().ok())
                        .map(SeqNum::new);
                }
                TAG_SENDER_COMP_ID => sender_comp_id = comp_id(value),
                TAG_TARGET_COMP_ID => target_comp_id = comp_id(value),
                TAG_SENDER_SUB_ID => sender_sub_id = Some(text()),
                TAG_TARGET_SUB_ID => target_sub_id = Some(text()),
                TAG_SENDER_LOCATION_ID => sender_location_id = Some(text()),
                TAG_TARGET_LOCATION_ID => target_location_id = Some(text()),
                _ => {}
            }
        }

        Ok(Self {
            begin_string: begin_string.ok_or(CodecError::MissingField {
                tag: TAG_BEGIN_STRING,
            })?,
            msg_type: msg_type.ok_or(CodecError::MissingField { tag: TAG_MSG_TYPE })?,
            msg_seq_num,
            sender_comp_id: sender_comp_id.ok_or(CodecError::MissingField {
                tag: TAG_SENDER_COMP_ID,
            })?,
            target_comp_id: target_comp_id.ok_or(CodecError::MissingField {
                tag: TAG_TARGET_COMP_ID,
            })?,
            sender_sub_id,
            target_sub_id,
            sender_location_id,
            target_location_id,
        })
    }

    /// Returns true if this frame is a Logon.
    #[must_use]
    pub fn is_logon(&self) -> bool {
        self.msg_type.as_bytes() == MSG_TYPE_LOGON
    }
}

fn comp_id(value: &[u8]) -> Option<CompId> {
    std::str::from_utf8(value).ok().and_then(CompId::new)
}

fn parse_tag(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() || bytes.len() > 9 {
        return None;
    }
    bytes.iter().try_fold(0u32, |acc, &b| {
        b.is_ascii_digit().then(|| acc * 10 + u32::from(b - b'0'))
    })
}
