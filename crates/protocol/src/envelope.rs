//! Multiplexed frame envelope.
//!
//! Every byte on the wire travels inside a tagged frame. The 4-byte
//! little-endian header packs `(MPLEX_BASE + code) << 24 | payload_len`;
//! frames tagged [`MessageCode::Data`] carry the application stream, all
//! other codes are out-of-band messages.

use thiserror::Error;

/// Offset added to every message code to form the frame tag.
pub const MPLEX_BASE: u8 = 7;

/// Length in bytes of an encoded frame header.
pub const HEADER_LEN: usize = 4;

/// Mask selecting the 24-bit payload length inside a raw header word.
pub const PAYLOAD_MASK: u32 = 0x00ff_ffff;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_LENGTH: u32 = PAYLOAD_MASK;

/// Codes for multiplexed frames the sender sends or receives.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum MessageCode {
    /// Application stream bytes.
    Data = 0,
    /// Non-fatal transfer error referring to a particular file.
    ErrorXfer = 1,
    /// Informational text for the remote user.
    Info = 2,
    /// Fatal error text.
    Error = 3,
    /// Warning text.
    Warning = 4,
    /// Text destined for the remote log sink only.
    Log = 6,
    /// Accumulated I/O-error bits from the other side.
    IoError = 22,
    /// A requested file cannot be sent; payload is its index.
    NoSend = 102,
}

impl MessageCode {
    const ALL: [Self; 8] = [
        Self::Data,
        Self::ErrorXfer,
        Self::Info,
        Self::Error,
        Self::Warning,
        Self::Log,
        Self::IoError,
        Self::NoSend,
    ];

    /// All known codes, sorted by numeric value.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &Self::ALL
    }

    /// Numeric wire value of the code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Looks up a code by its numeric wire value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Data),
            1 => Some(Self::ErrorXfer),
            2 => Some(Self::Info),
            3 => Some(Self::Error),
            4 => Some(Self::Warning),
            6 => Some(Self::Log),
            22 => Some(Self::IoError),
            102 => Some(Self::NoSend),
            _ => None,
        }
    }

    /// Upstream identifier for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Data => "MSG_DATA",
            Self::ErrorXfer => "MSG_ERROR_XFER",
            Self::Info => "MSG_INFO",
            Self::Error => "MSG_ERROR",
            Self::Warning => "MSG_WARNING",
            Self::Log => "MSG_LOG",
            Self::IoError => "MSG_IO_ERROR",
            Self::NoSend => "MSG_NO_SEND",
        }
    }

    /// Whether frames with this code carry human-readable text.
    #[must_use]
    pub const fn is_logging(self) -> bool {
        matches!(
            self,
            Self::ErrorXfer | Self::Info | Self::Error | Self::Warning | Self::Log
        )
    }
}

impl std::fmt::Display for MessageCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for MessageCode {
    type Error = EnvelopeError;

    fn try_from(value: u8) -> Result<Self, EnvelopeError> {
        Self::from_u8(value).ok_or(EnvelopeError::UnknownMessageCode(value))
    }
}

/// Envelope-level failures.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum EnvelopeError {
    /// The tag byte was below [`MPLEX_BASE`].
    #[error("frame tag {0} is below the multiplex base")]
    InvalidTag(u8),
    /// The tag byte named a code this implementation does not know.
    #[error("unknown multiplexed message code {0}")]
    UnknownMessageCode(u8),
    /// Fewer than [`HEADER_LEN`] bytes were available.
    #[error("truncated frame header of {actual} bytes")]
    TruncatedHeader {
        /// Number of bytes that were available.
        actual: usize,
    },
    /// The payload length does not fit the 24-bit length field.
    #[error("frame payload length {0} exceeds the 24-bit limit")]
    OversizedPayload(u32),
}

/// Decoded frame header: a message code plus payload length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    code: MessageCode,
    payload_len: u32,
}

impl MessageHeader {
    /// Creates a header, validating the payload length.
    pub const fn new(code: MessageCode, payload_len: u32) -> Result<Self, EnvelopeError> {
        if payload_len > MAX_PAYLOAD_LENGTH {
            return Err(EnvelopeError::OversizedPayload(payload_len));
        }
        Ok(Self { code, payload_len })
    }

    /// Message code of the frame.
    #[must_use]
    pub const fn code(self) -> MessageCode {
        self.code
    }

    /// Payload length in bytes.
    #[must_use]
    pub const fn payload_len(self) -> u32 {
        self.payload_len
    }

    /// Payload length as a `usize`.
    #[must_use]
    pub const fn payload_len_usize(self) -> usize {
        self.payload_len as usize
    }

    /// Encodes the header into its 4-byte little-endian wire form.
    #[must_use]
    pub const fn encode(self) -> [u8; HEADER_LEN] {
        let raw = ((MPLEX_BASE as u32 + self.code as u32) << 24) | self.payload_len;
        raw.to_le_bytes()
    }

    /// Decodes a header from its wire form.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() < HEADER_LEN {
            return Err(EnvelopeError::TruncatedHeader {
                actual: bytes.len(),
            });
        }
        let mut head = [0u8; HEADER_LEN];
        head.copy_from_slice(&bytes[..HEADER_LEN]);
        let raw = u32::from_le_bytes(head);
        let tag = (raw >> 24) as u8;
        let Some(code_value) = tag.checked_sub(MPLEX_BASE) else {
            return Err(EnvelopeError::InvalidTag(tag));
        };
        let code = MessageCode::try_from(code_value)?;
        Ok(Self {
            code,
            payload_len: raw & PAYLOAD_MASK,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_for_all_codes_and_sample_lengths() {
        const PAYLOAD_SAMPLES: [u32; 3] = [0, 1, MAX_PAYLOAD_LENGTH];

        for &code in MessageCode::all() {
            for &len in &PAYLOAD_SAMPLES {
                let header = MessageHeader::new(code, len).expect("constructible header");
                let decoded = MessageHeader::decode(&header.encode()).expect("decode succeeds");
                assert_eq!(decoded.code(), code);
                assert_eq!(decoded.payload_len(), len);
            }
        }
    }

    #[test]
    fn encode_uses_little_endian_layout() {
        let payload_len = 0x00a1_b2c3;
        let header = MessageHeader::new(MessageCode::Info, payload_len).expect("constructible header");

        let expected_raw =
            ((u32::from(MPLEX_BASE) + u32::from(MessageCode::Info.as_u8())) << 24) | payload_len;
        assert_eq!(header.encode(), expected_raw.to_le_bytes());
    }

    #[test]
    fn decode_rejects_truncated_header() {
        let err = MessageHeader::decode(&[0u8; 2]).unwrap_err();
        assert_eq!(err, EnvelopeError::TruncatedHeader { actual: 2 });
    }

    #[test]
    fn decode_rejects_tag_without_base_offset() {
        let raw = (u32::from(MPLEX_BASE - 1) << 24) | 1;
        let err = MessageHeader::decode(&raw.to_le_bytes()).unwrap_err();
        assert_eq!(err, EnvelopeError::InvalidTag(MPLEX_BASE - 1));
    }

    #[test]
    fn decode_rejects_unknown_message_codes() {
        let unknown_code = 11u8;
        let tag = u32::from(MPLEX_BASE) + u32::from(unknown_code);
        let raw = (tag << 24) | 5;
        let err = MessageHeader::decode(&raw.to_le_bytes()).unwrap_err();
        assert_eq!(err, EnvelopeError::UnknownMessageCode(unknown_code));
    }

    #[test]
    fn new_rejects_oversized_payloads() {
        let err = MessageHeader::new(MessageCode::Info, MAX_PAYLOAD_LENGTH + 1).unwrap_err();
        assert_eq!(err, EnvelopeError::OversizedPayload(MAX_PAYLOAD_LENGTH + 1));
    }

    #[test]
    fn message_code_variants_round_trip_through_try_from() {
        for &code in MessageCode::all() {
            let decoded = MessageCode::try_from(code.as_u8()).expect("known code");
            assert_eq!(decoded, code);
        }
    }

    #[test]
    fn message_code_all_is_sorted_by_numeric_value() {
        for window in MessageCode::all().windows(2) {
            assert!(window[0].as_u8() < window[1].as_u8());
        }
    }

    #[test]
    fn logging_classification_covers_text_codes_only() {
        for &code in MessageCode::all() {
            let expected = !matches!(
                code,
                MessageCode::Data | MessageCode::IoError | MessageCode::NoSend
            );
            assert_eq!(code.is_logging(), expected, "mismatch for {code:?}");
        }
    }
}
