use core::fmt;

use crate::object_path::ObjectPathError;
use crate::signature::SignatureError;

/// The result type used throughout this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// The error type used throughout this crate.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        Self { kind }
    }

    /// The kind of error that occurred, for diagnostic purposes only.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    Signature(SignatureError),
    ObjectPath(ObjectPathError),
    Utf8Error,
    NotNullTerminated,
    BufferUnderflow,
    Misaligned,
    ArrayTooLong(u32),
    BodyTooLong(u32),
    HeaderTooLong(u32),
    InvalidEndianness(u8),
    InvalidProtocolVersion(u8),
    InvalidMessageType(u8),
    MissingPath,
    MissingInterface,
    MissingMember,
    MissingReplySerial,
    MissingErrorName,
    ZeroSerial,
    ZeroReplySerial,
    MissingMessage,
    SignatureMismatch,
    UnknownTypeCodeAt(u8),
    UnsupportedVariant,
    InvalidSasl,
    InvalidSaslState,
    InvalidSaslResponse,
    UnsupportedAuthUid,
    InvalidAddress,
    MissingBus,
    BindCollision,
    WouldBlock,
    Closed,
    SendFailed,
    InvalidNameReply(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Signature(error) => write!(f, "invalid signature: {error}"),
            ErrorKind::ObjectPath(error) => write!(f, "invalid object path: {error}"),
            ErrorKind::Utf8Error => write!(f, "string is not valid utf-8"),
            ErrorKind::NotNullTerminated => write!(f, "string is not nul-terminated"),
            ErrorKind::BufferUnderflow => write!(f, "buffer underflow while decoding"),
            ErrorKind::Misaligned => write!(f, "value is not aligned"),
            ErrorKind::ArrayTooLong(n) => write!(f, "array of {n} bytes exceeds the maximum size"),
            ErrorKind::BodyTooLong(n) => write!(f, "body of {n} bytes exceeds the maximum size"),
            ErrorKind::HeaderTooLong(n) => write!(f, "header of {n} bytes exceeds the maximum size"),
            ErrorKind::InvalidEndianness(b) => write!(f, "invalid endianness byte {b:#04x}"),
            ErrorKind::InvalidProtocolVersion(v) => write!(f, "unsupported protocol version {v}"),
            ErrorKind::InvalidMessageType(t) => write!(f, "invalid message type {t}"),
            ErrorKind::MissingPath => write!(f, "message is missing a path header field"),
            ErrorKind::MissingInterface => write!(f, "message is missing an interface header field"),
            ErrorKind::MissingMember => write!(f, "message is missing a member header field"),
            ErrorKind::MissingReplySerial => write!(f, "message is missing a reply_serial header field"),
            ErrorKind::MissingErrorName => write!(f, "error message is missing an error_name header field"),
            ErrorKind::ZeroSerial => write!(f, "serial must be non-zero"),
            ErrorKind::ZeroReplySerial => write!(f, "reply_serial must be non-zero"),
            ErrorKind::MissingMessage => write!(f, "no complete message is available yet"),
            ErrorKind::SignatureMismatch => write!(f, "value does not match the expected signature"),
            ErrorKind::UnknownTypeCodeAt(code) => write!(f, "unknown type code {:?} while decoding", *code as char),
            ErrorKind::UnsupportedVariant => write!(f, "unsupported variant signature"),
            ErrorKind::InvalidSasl => write!(f, "invalid SASL command"),
            ErrorKind::InvalidSaslState => write!(f, "SASL command is not valid in the current state"),
            ErrorKind::InvalidSaslResponse => write!(f, "invalid SASL response"),
            ErrorKind::UnsupportedAuthUid => write!(f, "could not determine local uid for EXTERNAL auth"),
            ErrorKind::InvalidAddress => write!(f, "invalid bus address"),
            ErrorKind::MissingBus => write!(f, "no bus address was provided"),
            ErrorKind::BindCollision => write!(f, "an interface is already bound at this path"),
            ErrorKind::WouldBlock => write!(f, "operation would block"),
            ErrorKind::Closed => write!(f, "connection is closed"),
            ErrorKind::SendFailed => write!(f, "the host send callback failed"),
            ErrorKind::InvalidNameReply(n) => write!(f, "invalid name-request reply code {n}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Signature(error) => Some(error),
            ErrorKind::ObjectPath(error) => Some(error),
            _ => None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<SignatureError> for Error {
    fn from(error: SignatureError) -> Self {
        Error::new(ErrorKind::Signature(error))
    }
}

impl From<ObjectPathError> for Error {
    fn from(error: ObjectPathError) -> Self {
        Error::new(ErrorKind::ObjectPath(error))
    }
}

/// A D-Bus protocol-level error, carrying the wire error name and an
/// optional human-readable message. Distinct from [`Error`]: this is
/// what a handler uses to fail a method call, or what a caller receives
/// when a remote reports an error.
#[derive(Debug, Clone)]
pub struct DBusError {
    name: Box<str>,
    message: Option<Box<str>>,
}

impl DBusError {
    pub fn new(name: impl Into<Box<str>>, message: impl Into<Option<Box<str>>>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl fmt::Display for DBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {message}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl std::error::Error for DBusError {}
