//! The LLRPStatus parameter and its code space
// (c) 2025 the llrpd contributors

use bytes::{Buf, Bytes};
use serde::Serialize;

/// Parameter type code for LLRPStatus.
pub const PARAM_LLRP_STATUS: u16 = 287;

/// TLV parameter header: 16-bit type, 16-bit length (header included).
pub(crate) const PARAM_HEADER_LEN: usize = 4;

/// Payload unmarshalling failures.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload ended before the structure it promised.
    #[error("payload truncated")]
    Truncated,
    /// A TLV length field disagrees with the remaining payload.
    #[error("parameter length {0} is inconsistent with the remaining payload")]
    BadParameterLength(usize),
    /// A different parameter type was found than the layout requires.
    #[error("expected parameter type {expected}, found {got}")]
    UnexpectedParameter {
        /// parameter type the message layout requires here
        expected: u16,
        /// parameter type actually present
        got: u16,
    },
    /// A text field held bytes that are not UTF-8.
    #[error("text field is not valid UTF-8")]
    BadUtf8(#[from] std::string::FromUtf8Error),
}

/// Status codes a reader may report inside an `LLRPStatus`.
///
/// The wire field is 16 bits wide and newer readers may use codes this
/// catalog does not know, so [`LlrpStatus`] stores the raw code and
/// renders unknown values numerically.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    strum_macros::Display,
    strum_macros::FromRepr,
)]
#[repr(u16)]
#[allow(missing_docs)] // names track the standard
#[non_exhaustive]
pub enum StatusCode {
    Success = 0,
    MParameterError = 100,
    MFieldError = 101,
    MUnexpectedParameter = 102,
    MMissingParameter = 103,
    MDuplicateParameter = 104,
    MOverflowParameter = 105,
    MOverflowField = 106,
    MUnknownParameter = 107,
    MUnknownField = 108,
    MUnsupportedMessage = 109,
    MUnsupportedVersion = 110,
    MUnsupportedParameter = 111,
    MUnexpectedMessage = 112,
    PParameterError = 200,
    PFieldError = 201,
    PUnexpectedParameter = 202,
    PMissingParameter = 203,
    PDuplicateParameter = 204,
    POverflowParameter = 205,
    POverflowField = 206,
    PUnknownParameter = 207,
    PUnknownField = 208,
    PUnsupportedParameter = 209,
    AInvalid = 300,
    AOutOfRange = 301,
    RDeviceError = 401,
}

impl StatusCode {
    /// Human-readable rendering that copes with codes outside the
    /// catalog.
    #[must_use]
    pub fn describe(code: u16) -> String {
        StatusCode::from_repr(code)
            .map_or_else(|| format!("status code {code}"), |c| c.to_string())
    }
}

/// The status sub-structure most LLRP responses carry.
///
/// Only the code and description are interpreted; any FieldError or
/// ParameterError sub-parameters after the description are retained
/// raw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LlrpStatus {
    /// Raw status code; `0` is success.
    pub code: u16,
    /// The reader's human-readable error description, often empty.
    pub description: String,
    /// Undecoded sub-parameters, rendered as hex in JSON.
    pub detail: Bytes,
}

/// JSON shape: the raw code, its catalog name, the description, and
/// (when present) the raw sub-parameters as hex.
impl Serialize for LlrpStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct as _;
        let fields = 3 + usize::from(!self.detail.is_empty());
        let mut out = serializer.serialize_struct("LlrpStatus", fields)?;
        out.serialize_field("Status", &self.code)?;
        out.serialize_field("StatusName", &self.code_name())?;
        out.serialize_field("ErrorDescription", &self.description)?;
        if !self.detail.is_empty() {
            out.serialize_field("Detail", &hex::encode(&self.detail))?;
        }
        out.end()
    }
}

impl LlrpStatus {
    /// A success status with no description.
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: StatusCode::Success as u16,
            description: String::new(),
            detail: Bytes::new(),
        }
    }

    /// Whether the reader reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code == StatusCode::Success as u16
    }

    /// The catalog name of the code, or a numeric fallback.
    #[must_use]
    pub fn code_name(&self) -> String {
        StatusCode::describe(self.code)
    }

    /// Decodes an `LLRPStatus` TLV parameter from the head of `buf`,
    /// consuming it.
    pub fn decode(buf: &mut Bytes) -> Result<Self, DecodeError> {
        let (ptype, body_len) = read_param_header(buf)?;
        if ptype != PARAM_LLRP_STATUS {
            return Err(DecodeError::UnexpectedParameter {
                expected: PARAM_LLRP_STATUS,
                got: ptype,
            });
        }
        let mut body = buf.split_to(body_len);
        if body.remaining() < 4 {
            return Err(DecodeError::Truncated);
        }
        let code = body.get_u16();
        let desc_len = body.get_u16() as usize;
        if body.remaining() < desc_len {
            return Err(DecodeError::Truncated);
        }
        let description = String::from_utf8(body.split_to(desc_len).to_vec())?;
        Ok(Self {
            code,
            description,
            detail: body,
        })
    }
}

impl std::fmt::Display for LlrpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.description.is_empty() {
            write!(f, "{}", self.code_name())
        } else {
            write!(f, "{}: {}", self.code_name(), self.description)
        }
    }
}

/// Reads one TLV parameter header off the front of `buf`, returning
/// the parameter type and the length of the body that follows.
///
/// TV-encoded parameters (leading bit set) do not occur at the
/// positions this crate decodes and are treated as layout errors.
pub(crate) fn read_param_header(buf: &mut Bytes) -> Result<(u16, usize), DecodeError> {
    if buf.remaining() < PARAM_HEADER_LEN {
        return Err(DecodeError::Truncated);
    }
    let raw = buf.get_u16();
    if raw & 0x8000 != 0 {
        return Err(DecodeError::UnexpectedParameter {
            expected: PARAM_LLRP_STATUS,
            got: raw,
        });
    }
    let ptype = raw & 0x3FF;
    let total = buf.get_u16() as usize;
    if total < PARAM_HEADER_LEN || total - PARAM_HEADER_LEN > buf.remaining() {
        return Err(DecodeError::BadParameterLength(total));
    }
    Ok((ptype, total - PARAM_HEADER_LEN))
}
