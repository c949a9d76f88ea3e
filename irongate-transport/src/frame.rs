/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 16/10/26
******************************************************************************/

//! Minimal frame builder.
//!
//! Used for the custom reject messages libraries hand to the gateway and by
//! test clients. It writes fields in the order given and fills in
//! BodyLength and CheckSum.

use crate::codec::{SOH, checksum};
use crate::header::{
    TAG_MSG_SEQ_NUM, TAG_MSG_TYPE, TAG_SENDER_COMP_ID, TAG_TARGET_COMP_ID,
};
use bytes::{BufMut, Bytes, BytesMut};

/// Builds a single FIX frame.
#[derive(Debug)]
pub struct FrameBuilder {
    begin_string: String,
    body: BytesMut,
}

impl FrameBuilder {
    /// Starts a frame with the given BeginString and MsgType.
    #[must_use]
    pub fn new(begin_string: impl Into<String>, msg_type: &str) -> Self {
        let mut builder = Self {
            begin_string: begin_string.into(),
            body: BytesMut::with_capacity(128),
        };
        builder.put_str(TAG_MSG_TYPE, msg_type);
        builder
    }

    /// Starts a frame with the usual session header fields.
    #[must_use]
    pub fn with_header(
        begin_string: impl Into<String>,
        msg_type: &str,
        sender_comp_id: &str,
        target_comp_id: &str,
        msg_seq_num: u64,
    ) -> Self {
        Self::new(begin_string, msg_type)
            .field(TAG_SENDER_COMP_ID, sender_comp_id)
            .field(TAG_TARGET_COMP_ID, target_comp_id)
            .uint_field(TAG_MSG_SEQ_NUM, msg_seq_num)
    }

    /// Appends a string field.
    #[must_use]
    pub fn field(mut self, tag: u32, value: &str) -> Self {
        self.put_str(tag, value);
        self
    }

    /// Appends an unsigned integer field.
    #[must_use]
    pub fn uint_field(mut self, tag: u32, value: u64) -> Self {
        let mut buf = itoa::Buffer::new();
        self.put_raw(tag, buf.format(value).as_bytes());
        self
    }

    fn put_str(&mut self, tag: u32, value: &str) {
        self.put_raw(tag, value.as_bytes());
    }

    fn put_raw(&mut self, tag: u32, value: &[u8]) {
        let mut tag_buf = itoa::Buffer::new();
        self.body.put_slice(tag_buf.format(tag).as_bytes());
        self.body.put_u8(b'=');
        self.body.put_slice(value);
        self.body.put_u8(SOH);
    }

    /// Finishes the frame.
    #[must_use]
    pub fn build(self) -> Bytes {
        let mut len_buf = itoa::Buffer::new();
        let body_len = len_buf.format(self.body.len());

        let mut frame =
            BytesMut::with_capacity(self.begin_string.len() + body_len.len() + self.body.len() + 16);
        frame.put_slice(b"8=");
        frame.put_slice(self.begin_string.as_bytes());
        frame.put_u8(SOH);
        frame.put_slice(b"9=");
        frame.put_slice(body_len.as_bytes());
        frame.put_u8(SOH);
        frame.put_slice(&self.body);

        let sum = checksum(&frame);
        frame.put_slice(b"10=");
        frame.put_u8(b'0' + sum / 100);
        frame.put_u8(b'0' + (sum / 10) % 10);
        frame.put_u8(b'0' + sum % 10);
        frame.put_u8(SOH);
        frame.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FixCodec;
    use crate::header::FrameHeader;
    use tokio_util::codec::Decoder;

    #[test]
    fn test_built_frame_decodes() {
        let frame = FrameBuilder::with_header("FIX.4.4", "A", "CLIENT", "SERVER", 1)
            .uint_field(108, 30)
            .build();

        let mut buf = BytesMut::from(&frame[..]);
        let decoded = FixCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);

        let header = FrameHeader::parse(&decoded).unwrap();
        assert!(header.is_logon());
        assert_eq!(header.sender_comp_id.as_str(), "CLIENT");
    }

    #[test]
    fn test_field_order_is_preserved() {
        let frame = FrameBuilder::new("FIX.4.2", "5").field(58, "bye").build();
        let text = String::from_utf8_lossy(&frame);
        assert!(text.starts_with("8=FIX.4.2\x019=12\x0135=5\x0158=bye\x01"));
        assert!(text.ends_with('\x01'));
    }
}
