//! Error types.

use core::fmt;

use crate::frame::MAX_REQUEST_SIZE;

/// An XML-RPC `<fault>` payload.
///
/// Carried by method responses whose body is a fault struct instead of a
/// result value. `code` and `message` come from the `faultCode` and
/// `faultString` struct members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub code: i32,
    pub message: String,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault {}: {}", self.code, self.message)
    }
}

impl std::error::Error for Fault {}

/// XML-RPC serialization errors.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// XML-RPC has no representation for NaN or infinite doubles.
    NonFiniteDouble(f64),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonFiniteDouble(v) => write!(f, "double {v} is not representable"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// XML-RPC deserialization errors.
#[derive(Debug)]
pub enum DecodeError {
    /// The underlying XML is malformed.
    Xml(quick_xml::Error),
    /// A `<base64>` scalar did not decode.
    Base64(base64::DecodeError),
    /// A scalar element held text that does not parse as its type.
    InvalidScalar { kind: &'static str, text: String },
    /// The document structure is not the expected XML-RPC shape.
    Unexpected { expected: String, found: String },
    /// The document ended mid-element.
    Eof,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xml(e) => write!(f, "malformed XML: {e}"),
            Self::Base64(e) => write!(f, "malformed base64: {e}"),
            Self::InvalidScalar { kind, text } => {
                write!(f, "invalid {kind} scalar: {text:?}")
            }
            Self::Unexpected { expected, found } => {
                write!(f, "expected {expected}, found {found}")
            }
            Self::Eof => write!(f, "unexpected end of document"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Xml(e) => Some(e),
            Self::Base64(e) => Some(e),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for DecodeError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e)
    }
}

impl From<base64::DecodeError> for DecodeError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Base64(e)
    }
}

/// Client-level errors.
#[derive(Debug)]
pub enum ClientError {
    /// The session is not connected; no bytes were written.
    NotConnected,
    /// `connect` was called on a session that is already connecting or connected.
    AlreadyConnected,
    /// Socket-level failure.
    Io(std::io::Error),
    /// The session left the connected state while the request was in flight.
    /// The payload is the disconnect reason passed to the host.
    Disconnected(String),
    /// The server answered with an XML-RPC fault.
    Fault(Fault),
    /// The request could not be serialized.
    Encode(EncodeError),
    /// A response body could not be deserialized.
    Decode(DecodeError),
    /// The encoded request exceeds [`MAX_REQUEST_SIZE`] including framing.
    RequestTooLarge { len: usize },
    /// The handle counter wrapped onto a handle that is still outstanding.
    /// Fatal: the session is closed.
    HandleCollision(u32),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::AlreadyConnected => write!(f, "already connected"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Disconnected(reason) => write!(f, "disconnected: {reason}"),
            Self::Fault(fault) => write!(f, "{fault}"),
            Self::Encode(e) => write!(f, "serialize error: {e}"),
            Self::Decode(e) => write!(f, "deserialize error: {e}"),
            Self::RequestTooLarge { len } => {
                write!(f, "request of {len} bytes exceeds {MAX_REQUEST_SIZE}")
            }
            Self::HandleCollision(handle) => {
                write!(f, "request handle {handle:#010x} already outstanding")
            }
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Fault(e) => Some(e),
            Self::Encode(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<Fault> for ClientError {
    fn from(e: Fault) -> Self {
        Self::Fault(e)
    }
}

impl From<EncodeError> for ClientError {
    fn from(e: EncodeError) -> Self {
        Self::Encode(e)
    }
}

impl From<DecodeError> for ClientError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}
