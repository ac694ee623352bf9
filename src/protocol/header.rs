//! LLRP message-header codec
// (c) 2025 the llrpd contributors

use std::fmt;
use std::io;

/// The on-wire size of an LLRP message header. Fixed by the standard;
/// the wire length field counts these bytes too.
pub const HEADER_LEN: usize = 10;

/// Largest payload expressible once the header is counted into the
/// 32-bit wire length.
pub const MAX_PAYLOAD_LEN: u32 = u32::MAX - HEADER_LEN as u32;

/// Message types the standard reserves for future use.
const RESERVED_TYPES: std::ops::RangeInclusive<u16> = 900..=999;

/// Protocol versions this library speaks.
///
/// The version occupies 3 bits on the wire; readers may therefore
/// report versions outside this set, which is why [`Header`] carries
/// the raw field.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde::Serialize,
    strum_macros::Display,
    strum_macros::FromRepr,
)]
#[repr(u8)]
pub enum ProtocolVersion {
    /// LLRP 1.0.1
    #[strum(serialize = "1.0.1")]
    V1_0_1 = 1,
    /// LLRP 1.1
    #[strum(serialize = "1.1")]
    V1_1 = 2,
}

impl ProtocolVersion {
    /// The oldest version the library speaks; connections start here.
    pub const MIN: Self = Self::V1_0_1;
    /// The newest version the library speaks.
    pub const MAX: Self = Self::V1_1;
}

/// A 10-bit LLRP message type code.
///
/// The code space is open: decoding never rejects a code, so that
/// callers can observe (and log) whatever a misbehaving peer sent.
/// Encoding rejects codes outside the registered catalog and codes in
/// the reserved 900..=999 band.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType(u16);

#[allow(missing_docs)] // the names are the documentation
impl MessageType {
    pub const GET_READER_CAPABILITIES: Self = Self(1);
    pub const GET_READER_CONFIG: Self = Self(2);
    pub const SET_READER_CONFIG: Self = Self(3);
    pub const CLOSE_CONNECTION_RESPONSE: Self = Self(4);
    pub const GET_READER_CAPABILITIES_RESPONSE: Self = Self(11);
    pub const GET_READER_CONFIG_RESPONSE: Self = Self(12);
    pub const SET_READER_CONFIG_RESPONSE: Self = Self(13);
    pub const CLOSE_CONNECTION: Self = Self(14);
    pub const ADD_ROSPEC: Self = Self(20);
    pub const DELETE_ROSPEC: Self = Self(21);
    pub const START_ROSPEC: Self = Self(22);
    pub const STOP_ROSPEC: Self = Self(23);
    pub const ENABLE_ROSPEC: Self = Self(24);
    pub const DISABLE_ROSPEC: Self = Self(25);
    pub const GET_ROSPECS: Self = Self(26);
    pub const ADD_ROSPEC_RESPONSE: Self = Self(30);
    pub const DELETE_ROSPEC_RESPONSE: Self = Self(31);
    pub const START_ROSPEC_RESPONSE: Self = Self(32);
    pub const STOP_ROSPEC_RESPONSE: Self = Self(33);
    pub const ENABLE_ROSPEC_RESPONSE: Self = Self(34);
    pub const DISABLE_ROSPEC_RESPONSE: Self = Self(35);
    pub const GET_ROSPECS_RESPONSE: Self = Self(36);
    pub const ADD_ACCESS_SPEC: Self = Self(40);
    pub const DELETE_ACCESS_SPEC: Self = Self(41);
    pub const ENABLE_ACCESS_SPEC: Self = Self(42);
    pub const DISABLE_ACCESS_SPEC: Self = Self(43);
    pub const GET_ACCESS_SPECS: Self = Self(44);
    pub const GET_SUPPORTED_VERSION: Self = Self(46);
    pub const SET_PROTOCOL_VERSION: Self = Self(47);
    pub const ADD_ACCESS_SPEC_RESPONSE: Self = Self(50);
    pub const DELETE_ACCESS_SPEC_RESPONSE: Self = Self(51);
    pub const ENABLE_ACCESS_SPEC_RESPONSE: Self = Self(52);
    pub const DISABLE_ACCESS_SPEC_RESPONSE: Self = Self(53);
    pub const GET_ACCESS_SPECS_RESPONSE: Self = Self(54);
    pub const GET_SUPPORTED_VERSION_RESPONSE: Self = Self(56);
    pub const SET_PROTOCOL_VERSION_RESPONSE: Self = Self(57);
    pub const GET_REPORT: Self = Self(60);
    pub const RO_ACCESS_REPORT: Self = Self(61);
    pub const KEEP_ALIVE: Self = Self(62);
    pub const READER_EVENT_NOTIFICATION: Self = Self(63);
    pub const ENABLE_EVENTS_AND_REPORTS: Self = Self(64);
    pub const KEEP_ALIVE_ACK: Self = Self(72);
    pub const ERROR_MESSAGE: Self = Self(100);
    pub const CUSTOM_MESSAGE: Self = Self(1023);
}

impl MessageType {
    /// The highest code in the registered catalog (which is also the
    /// top of the 10-bit space).
    pub const HIGHEST: Self = Self::CUSTOM_MESSAGE;

    /// Wraps a raw code without validation. Decode-side constructor.
    #[must_use]
    pub const fn from_code(code: u16) -> Self {
        Self(code & 0x3FF)
    }

    /// The numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        self.0
    }

    /// Is this code in the standard's reserved 900..=999 band?
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        self.0 >= 900 && self.0 <= 999
    }

    /// Is this one of the message types a reader originates without a
    /// request?
    #[must_use]
    pub const fn is_notification(self) -> bool {
        matches!(
            self,
            Self::RO_ACCESS_REPORT | Self::KEEP_ALIVE | Self::READER_EVENT_NOTIFICATION
        )
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::GET_READER_CAPABILITIES => "GetReaderCapabilities",
            Self::GET_READER_CONFIG => "GetReaderConfig",
            Self::SET_READER_CONFIG => "SetReaderConfig",
            Self::CLOSE_CONNECTION_RESPONSE => "CloseConnectionResponse",
            Self::GET_READER_CAPABILITIES_RESPONSE => "GetReaderCapabilitiesResponse",
            Self::GET_READER_CONFIG_RESPONSE => "GetReaderConfigResponse",
            Self::SET_READER_CONFIG_RESPONSE => "SetReaderConfigResponse",
            Self::CLOSE_CONNECTION => "CloseConnection",
            Self::ADD_ROSPEC => "AddROSpec",
            Self::DELETE_ROSPEC => "DeleteROSpec",
            Self::START_ROSPEC => "StartROSpec",
            Self::STOP_ROSPEC => "StopROSpec",
            Self::ENABLE_ROSPEC => "EnableROSpec",
            Self::DISABLE_ROSPEC => "DisableROSpec",
            Self::GET_ROSPECS => "GetROSpecs",
            Self::ADD_ROSPEC_RESPONSE => "AddROSpecResponse",
            Self::DELETE_ROSPEC_RESPONSE => "DeleteROSpecResponse",
            Self::START_ROSPEC_RESPONSE => "StartROSpecResponse",
            Self::STOP_ROSPEC_RESPONSE => "StopROSpecResponse",
            Self::ENABLE_ROSPEC_RESPONSE => "EnableROSpecResponse",
            Self::DISABLE_ROSPEC_RESPONSE => "DisableROSpecResponse",
            Self::GET_ROSPECS_RESPONSE => "GetROSpecsResponse",
            Self::ADD_ACCESS_SPEC => "AddAccessSpec",
            Self::DELETE_ACCESS_SPEC => "DeleteAccessSpec",
            Self::ENABLE_ACCESS_SPEC => "EnableAccessSpec",
            Self::DISABLE_ACCESS_SPEC => "DisableAccessSpec",
            Self::GET_ACCESS_SPECS => "GetAccessSpecs",
            Self::GET_SUPPORTED_VERSION => "GetSupportedVersion",
            Self::SET_PROTOCOL_VERSION => "SetProtocolVersion",
            Self::ADD_ACCESS_SPEC_RESPONSE => "AddAccessSpecResponse",
            Self::DELETE_ACCESS_SPEC_RESPONSE => "DeleteAccessSpecResponse",
            Self::ENABLE_ACCESS_SPEC_RESPONSE => "EnableAccessSpecResponse",
            Self::DISABLE_ACCESS_SPEC_RESPONSE => "DisableAccessSpecResponse",
            Self::GET_ACCESS_SPECS_RESPONSE => "GetAccessSpecsResponse",
            Self::GET_SUPPORTED_VERSION_RESPONSE => "GetSupportedVersionResponse",
            Self::SET_PROTOCOL_VERSION_RESPONSE => "SetProtocolVersionResponse",
            Self::GET_REPORT => "GetReport",
            Self::RO_ACCESS_REPORT => "ROAccessReport",
            Self::KEEP_ALIVE => "KeepAlive",
            Self::READER_EVENT_NOTIFICATION => "ReaderEventNotification",
            Self::ENABLE_EVENTS_AND_REPORTS => "EnableEventsAndReports",
            Self::KEEP_ALIVE_ACK => "KeepAliveAck",
            Self::ERROR_MESSAGE => "ErrorMessage",
            Self::CUSTOM_MESSAGE => "CustomMessage",
            _ => return None,
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "MessageType({})", self.0),
        }
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageType({}: {self})", self.0)
    }
}

impl serde::Serialize for MessageType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Framing failures.
///
/// The payload variants are fatal to their connection: once a payload
/// write or read stops part-way, the peer's idea of where the next
/// header starts no longer matches ours.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Fewer than [`HEADER_LEN`] bytes were available for a header.
    #[error("message header truncated ({got} of {HEADER_LEN} bytes)")]
    ShortHeader {
        /// bytes actually present
        got: usize,
    },
    /// The declared wire length cannot even cover the header.
    #[error("declared message length {0} is below the {HEADER_LEN}-byte minimum")]
    LengthUnderflow(u32),
    /// Refusing to encode a type in the reserved band.
    #[error("message type {0} lies in the reserved band {RESERVED_TYPES:?}")]
    ReservedType(u16),
    /// Refusing to encode a type outside the registered catalog.
    #[error("message type {0} is outside the registered type space")]
    OversizeType(u16),
    /// The payload cannot be expressed in the 32-bit wire length.
    #[error("payload of {0} bytes cannot be framed in a 32-bit length")]
    OversizePayload(u64),
    /// A payload write stopped part-way. Fatal.
    #[error("payload write interrupted after {written} of {expected} bytes")]
    PayloadWriteInterrupted {
        /// bytes the header promised
        expected: u64,
        /// bytes actually written
        written: u64,
        /// the underlying I/O failure
        #[source]
        source: io::Error,
    },
    /// A payload source or stream ended early. Fatal.
    #[error("payload ended after {got} of {expected} bytes")]
    PayloadReadShort {
        /// bytes the header promised
        expected: u64,
        /// bytes actually read
        got: u64,
    },
    /// Transport failure outside a payload body.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A decoded LLRP message header.
///
/// On the wire this is 10 bytes, big-endian: 3 reserved bits, a 3-bit
/// version, a 10-bit type, a 32-bit total length (header included) and
/// a 32-bit message id. In memory we keep the payload length instead
/// of the total; `payload_len = wire_len - 10`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    /// Raw 3-bit protocol version field.
    pub version: u8,
    /// The 10-bit message type.
    pub message_type: MessageType,
    /// Length of the payload that follows the header.
    pub payload_len: u32,
    /// Correlation id; echoed by the reader in the paired response.
    pub message_id: u32,
}

impl Header {
    /// Builds a header for a payload of known size, validating that the
    /// size fits the wire length field.
    pub fn for_payload(
        version: u8,
        message_type: MessageType,
        payload_len: usize,
        message_id: u32,
    ) -> Result<Self, FrameError> {
        let payload_len = u32::try_from(payload_len)
            .ok()
            .filter(|&n| n <= MAX_PAYLOAD_LEN)
            .ok_or(FrameError::OversizePayload(payload_len as u64))?;
        Ok(Self {
            version,
            message_type,
            payload_len,
            message_id,
        })
    }

    /// Total length of the message as it appears in the wire header.
    #[must_use]
    pub const fn wire_len(&self) -> u64 {
        self.payload_len as u64 + HEADER_LEN as u64
    }

    /// Encodes the header into its 10-byte wire form.
    ///
    /// Rejects reserved-band and out-of-catalog message types; decoding
    /// deliberately does not, so that a peer's bad code can be observed
    /// and logged by the caller.
    pub fn encode(&self) -> Result<[u8; HEADER_LEN], FrameError> {
        let code = self.message_type.code();
        if code > MessageType::HIGHEST.code() || code == 0 {
            return Err(FrameError::OversizeType(code));
        }
        if self.message_type.is_reserved() {
            return Err(FrameError::ReservedType(code));
        }
        if self.payload_len > MAX_PAYLOAD_LEN {
            return Err(FrameError::OversizePayload(u64::from(self.payload_len)));
        }
        let mut buf = [0u8; HEADER_LEN];
        let ver_and_type = (u16::from(self.version & 0b111) << 10) | code;
        buf[0..2].copy_from_slice(&ver_and_type.to_be_bytes());
        buf[2..6].copy_from_slice(&(self.payload_len + HEADER_LEN as u32).to_be_bytes());
        buf[6..10].copy_from_slice(&self.message_id.to_be_bytes());
        Ok(buf)
    }

    /// Decodes a header from the first 10 bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::ShortHeader { got: buf.len() });
        }
        let version = (buf[0] >> 2) & 0b111;
        let code = u16::from_be_bytes([buf[0], buf[1]]) & 0x3FF;
        let wire_len = u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]);
        let message_id = u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]);
        if wire_len < HEADER_LEN as u32 {
            return Err(FrameError::LengthUnderflow(wire_len));
        }
        Ok(Self {
            version,
            message_type: MessageType::from_code(code),
            payload_len: wire_len - HEADER_LEN as u32,
            message_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameError, HEADER_LEN, Header, MAX_PAYLOAD_LEN, MessageType};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn reference_vector() {
        // GetReaderCapabilities, version 1, empty payload.
        let h = Header {
            version: 1,
            message_type: MessageType::GET_READER_CAPABILITIES,
            payload_len: 0,
            message_id: 0x0102_0304,
        };
        let wire = h.encode().unwrap();
        assert_eq!(
            wire,
            [0x04, 0x01, 0x00, 0x00, 0x00, 0x0A, 0x01, 0x02, 0x03, 0x04]
        );
        assert_eq!(Header::decode(&wire).unwrap(), h);
    }

    #[rstest]
    #[case(1, MessageType::GET_READER_CONFIG, 0, 1)]
    #[case(2, MessageType::ADD_ROSPEC, 57, 0xDEAD_BEEF)]
    #[case(7, MessageType::CUSTOM_MESSAGE, MAX_PAYLOAD_LEN, u32::MAX)]
    #[case(1, MessageType::ERROR_MESSAGE, 4, 0)]
    fn roundtrip(
        #[case] version: u8,
        #[case] message_type: MessageType,
        #[case] payload_len: u32,
        #[case] message_id: u32,
    ) {
        let h = Header {
            version,
            message_type,
            payload_len,
            message_id,
        };
        let wire = h.encode().unwrap();
        let back = Header::decode(&wire).unwrap();
        assert_eq!(h, back);
        assert_eq!(h.wire_len(), u64::from(payload_len) + HEADER_LEN as u64);
    }

    #[rstest]
    #[case(900)]
    #[case(950)]
    #[case(999)]
    fn reserved_band_refused_on_encode(#[case] code: u16) {
        let h = Header {
            version: 1,
            message_type: MessageType::from_code(code),
            payload_len: 0,
            message_id: 1,
        };
        assert!(matches!(h.encode(), Err(FrameError::ReservedType(c)) if c == code));
    }

    #[test]
    fn reserved_band_passes_decode() {
        // A peer sending type 950 must be observable, not a codec error.
        let mut wire = [0u8; HEADER_LEN];
        wire[0..2].copy_from_slice(&((1u16 << 10) | 950).to_be_bytes());
        wire[2..6].copy_from_slice(&10u32.to_be_bytes());
        let h = Header::decode(&wire).unwrap();
        assert_eq!(h.message_type.code(), 950);
        assert!(h.message_type.is_reserved());
    }

    #[test]
    fn zero_type_refused_on_encode() {
        let h = Header {
            version: 1,
            message_type: MessageType::from_code(0),
            payload_len: 0,
            message_id: 1,
        };
        assert!(matches!(h.encode(), Err(FrameError::OversizeType(0))));
    }

    #[rstest]
    #[case(0)]
    #[case(5)]
    #[case(9)]
    fn length_underflow(#[case] wire_len: u32) {
        let mut wire = [0u8; HEADER_LEN];
        wire[0..2].copy_from_slice(&((1u16 << 10) | 1).to_be_bytes());
        wire[2..6].copy_from_slice(&wire_len.to_be_bytes());
        assert!(matches!(
            Header::decode(&wire),
            Err(FrameError::LengthUnderflow(n)) if n == wire_len
        ));
    }

    #[test]
    fn short_header() {
        let buf = [0x04u8, 0x01, 0x00];
        assert!(matches!(
            Header::decode(&buf),
            Err(FrameError::ShortHeader { got: 3 })
        ));
    }

    #[test]
    fn oversize_payload_refused() {
        let err = Header::for_payload(1, MessageType::CUSTOM_MESSAGE, usize::MAX, 1).unwrap_err();
        assert!(matches!(err, FrameError::OversizePayload(_)));
    }

    #[test]
    fn version_bits_do_not_bleed_into_type() {
        for version in 1..=7u8 {
            let h = Header {
                version,
                message_type: MessageType::KEEP_ALIVE,
                payload_len: 0,
                message_id: 9,
            };
            let back = Header::decode(&h.encode().unwrap()).unwrap();
            assert_eq!(back.version, version);
            assert_eq!(back.message_type, MessageType::KEEP_ALIVE);
        }
    }

    #[test]
    fn display_names() {
        assert_eq!(MessageType::GET_ROSPECS.to_string(), "GetROSpecs");
        assert_eq!(MessageType::from_code(950).to_string(), "MessageType(950)");
    }
}
