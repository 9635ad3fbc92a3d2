//! Message header and body representation: build, parse, and stream framing.

use crate::buf::{Buffer, MAX_BODY_LENGTH};
use crate::error::{Error, ErrorKind, Result};
use crate::marshal::{Endianness, Marshaller};
use crate::object_path::{ObjectPath, ObjectPathBuf};
use crate::signature::{Signature, SignatureBuf};
use crate::variant::Variant;

/// An opaque, non-zero serial number assigned to outgoing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Serial(core::num::NonZeroU32);

impl Serial {
    pub(crate) fn new(value: u32) -> Result<Self> {
        core::num::NonZeroU32::new(value)
            .map(Serial)
            .ok_or_else(|| Error::new(ErrorKind::ZeroSerial))
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl core::fmt::Display for Serial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const NO_REPLY_EXPECTED = 0x1;
        const NO_AUTO_START = 0x2;
        const ALLOW_INTERACTIVE_AUTHORIZATION = 0x4;
    }
}

/// The kind of a message, carrying the fields required for that kind.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    MethodCall {
        path: ObjectPathBuf,
        interface: Option<Box<str>>,
        member: Box<str>,
    },
    MethodReturn {
        reply_serial: Serial,
    },
    Error {
        error_name: Box<str>,
        reply_serial: Serial,
    },
    Signal {
        path: ObjectPathBuf,
        interface: Box<str>,
        member: Box<str>,
    },
}

impl MessageKind {
    fn type_code(&self) -> u8 {
        match self {
            MessageKind::MethodCall { .. } => 1,
            MessageKind::MethodReturn { .. } => 2,
            MessageKind::Error { .. } => 3,
            MessageKind::Signal { .. } => 4,
        }
    }
}

/// A complete D-Bus message: header fields plus a typed body.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub flags: Flags,
    pub serial: Serial,
    pub sender: Option<Box<str>>,
    pub destination: Option<Box<str>>,
    pub body: Vec<Variant>,
}

const HEADER_CODE_PATH: u8 = 1;
const HEADER_CODE_INTERFACE: u8 = 2;
const HEADER_CODE_MEMBER: u8 = 3;
const HEADER_CODE_ERROR_NAME: u8 = 4;
const HEADER_CODE_REPLY_SERIAL: u8 = 5;
const HEADER_CODE_DESTINATION: u8 = 6;
const HEADER_CODE_SENDER: u8 = 7;
const HEADER_CODE_SIGNATURE: u8 = 8;
const HEADER_CODE_UNIX_FDS: u8 = 9;

impl Message {
    pub fn method_call(path: &ObjectPath, interface: Option<&str>, member: &str) -> Self {
        Self {
            kind: MessageKind::MethodCall {
                path: path.to_owned(),
                interface: interface.map(Into::into),
                member: member.into(),
            },
            flags: Flags::empty(),
            serial: Serial::new(1).unwrap(),
            sender: None,
            destination: None,
            body: Vec::new(),
        }
    }

    pub fn method_return(reply_serial: Serial) -> Self {
        Self {
            kind: MessageKind::MethodReturn { reply_serial },
            flags: Flags::empty(),
            serial: Serial::new(1).unwrap(),
            sender: None,
            destination: None,
            body: Vec::new(),
        }
    }

    pub fn error(error_name: &str, reply_serial: Serial) -> Self {
        Self {
            kind: MessageKind::Error {
                error_name: error_name.into(),
                reply_serial,
            },
            flags: Flags::empty(),
            serial: Serial::new(1).unwrap(),
            sender: None,
            destination: None,
            body: Vec::new(),
        }
    }

    pub fn signal(path: &ObjectPath, interface: &str, member: &str) -> Self {
        Self {
            kind: MessageKind::Signal {
                path: path.to_owned(),
                interface: interface.into(),
                member: member.into(),
            },
            flags: Flags::empty(),
            serial: Serial::new(1).unwrap(),
            sender: None,
            destination: None,
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: Vec<Variant>) -> Self {
        self.body = body;
        self
    }

    pub fn with_destination(mut self, destination: impl Into<Box<str>>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    fn body_signature(&self) -> SignatureBuf {
        let mut buf = Vec::new();
        for value in &self.body {
            buf.extend_from_slice(value.signature().as_bytes());
        }
        SignatureBuf::new(&buf).unwrap_or_default()
    }

    /// Serialize this message, assigning `serial` as its wire serial.
    pub fn build(&self, serial: Serial, endianness: Endianness) -> Result<Vec<u8>> {
        let mut body_marshaller = Marshaller::new(endianness);
        for value in &self.body {
            body_marshaller.write(value)?;
        }
        let body = body_marshaller.into_inner();
        if body.len() > MAX_BODY_LENGTH as usize {
            return Err(Error::new(ErrorKind::BodyTooLong(body.len() as u32)));
        }

        let signature = self.body_signature();

        let mut fields = Vec::new();
        match &self.kind {
            MessageKind::MethodCall {
                path,
                interface,
                member,
            } => {
                fields.push((HEADER_CODE_PATH, Variant::ObjectPath(path.clone())));
                if let Some(interface) = interface {
                    fields.push((HEADER_CODE_INTERFACE, Variant::String(interface.clone())));
                }
                fields.push((HEADER_CODE_MEMBER, Variant::String(member.clone())));
            }
            MessageKind::MethodReturn { reply_serial } => {
                fields.push((
                    HEADER_CODE_REPLY_SERIAL,
                    Variant::UInt32(reply_serial.get()),
                ));
            }
            MessageKind::Error {
                error_name,
                reply_serial,
            } => {
                fields.push((HEADER_CODE_ERROR_NAME, Variant::String(error_name.clone())));
                fields.push((
                    HEADER_CODE_REPLY_SERIAL,
                    Variant::UInt32(reply_serial.get()),
                ));
            }
            MessageKind::Signal {
                path,
                interface,
                member,
            } => {
                fields.push((HEADER_CODE_PATH, Variant::ObjectPath(path.clone())));
                fields.push((HEADER_CODE_INTERFACE, Variant::String(interface.clone())));
                fields.push((HEADER_CODE_MEMBER, Variant::String(member.clone())));
            }
        }
        if let Some(destination) = &self.destination {
            fields.push((HEADER_CODE_DESTINATION, Variant::String(destination.clone())));
        }
        if let Some(sender) = &self.sender {
            fields.push((HEADER_CODE_SENDER, Variant::String(sender.clone())));
        }
        if !signature.is_empty() {
            fields.push((HEADER_CODE_SIGNATURE, Variant::Signature(signature)));
        }

        let mut header = Marshaller::new(endianness);
        header.write(&Variant::Byte(endianness.wire_byte()))?;
        header.write(&Variant::Byte(self.kind.type_code()))?;
        header.write(&Variant::Byte(self.flags.bits()))?;
        header.write(&Variant::Byte(1))?;
        header.write(&Variant::UInt32(body.len() as u32))?;
        header.write(&Variant::UInt32(serial.get()))?;

        let field_structs: Vec<Variant> = fields
            .into_iter()
            .map(|(code, value)| Variant::Struct(vec![Variant::Byte(code), Variant::Variant(Box::new(value))]))
            .collect();
        header.write(&Variant::Array(
            Signature::new(b"(yv)").unwrap().to_owned(),
            field_structs,
        ))?;

        let mut out = Buffer::new();
        out.extend_from_slice(header.as_slice());
        out.align_mut(8);
        out.extend_from_slice(&body);
        Ok(out.into_vec())
    }

    /// Parse exactly one complete message from `bytes`. Returns the
    /// message and the number of bytes consumed.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < 16 {
            return Err(Error::new(ErrorKind::MissingMessage));
        }

        let endianness = Endianness::from_wire_byte(bytes[0])?;
        let mut header_iter = crate::decode::Iter::new(bytes, endianness);
        let _endian_byte = header_iter.read_u8()?;
        let type_code = header_iter.read_u8()?;
        let flags_byte = header_iter.read_u8()?;
        let version = header_iter.read_u8()?;
        if version != 1 {
            return Err(Error::new(ErrorKind::InvalidProtocolVersion(version)));
        }
        let body_length = header_iter.read_u32()?;
        let serial_value = header_iter.read_u32()?;
        let serial = Serial::new(serial_value)?;

        let fields_array_ty = crate::signature::Type::Array(Signature::new(b"(yv)").unwrap());
        let fields_value = header_iter.read_value(fields_array_ty)?;
        let Variant::Array(_, field_structs) = fields_value else {
            unreachable!("(yv) array always decodes to Variant::Array")
        };

        let mut path = None;
        let mut interface = None;
        let mut member = None;
        let mut error_name = None;
        let mut reply_serial = None;
        let mut destination = None;
        let mut sender = None;
        let mut signature = SignatureBuf::default();

        for field in field_structs {
            let Variant::Struct(mut parts) = field else { continue };
            if parts.len() != 2 {
                continue;
            }
            let value = parts.pop().unwrap();
            let code_value = parts.pop().unwrap();
            let (Variant::Byte(code), Variant::Variant(value)) = (code_value, value) else {
                continue;
            };
            match code {
                HEADER_CODE_PATH => {
                    if let Variant::ObjectPath(p) = *value {
                        path = Some(p);
                    }
                }
                HEADER_CODE_INTERFACE => {
                    if let Some(s) = value.as_str() {
                        interface = Some(Box::<str>::from(s));
                    }
                }
                HEADER_CODE_MEMBER => {
                    if let Some(s) = value.as_str() {
                        member = Some(Box::<str>::from(s));
                    }
                }
                HEADER_CODE_ERROR_NAME => {
                    if let Some(s) = value.as_str() {
                        error_name = Some(Box::<str>::from(s));
                    }
                }
                HEADER_CODE_REPLY_SERIAL => {
                    if let Variant::UInt32(v) = *value {
                        reply_serial = Some(v);
                    }
                }
                HEADER_CODE_DESTINATION => {
                    if let Some(s) = value.as_str() {
                        destination = Some(Box::<str>::from(s));
                    }
                }
                HEADER_CODE_SENDER => {
                    if let Some(s) = value.as_str() {
                        sender = Some(Box::<str>::from(s));
                    }
                }
                HEADER_CODE_SIGNATURE => {
                    if let Variant::Signature(s) = *value {
                        signature = s;
                    }
                }
                HEADER_CODE_UNIX_FDS => {}
                _ => {}
            }
        }

        let kind = match type_code {
            1 => MessageKind::MethodCall {
                path: path.ok_or_else(|| Error::new(ErrorKind::MissingPath))?,
                interface,
                member: member.ok_or_else(|| Error::new(ErrorKind::MissingMember))?,
            },
            2 => MessageKind::MethodReturn {
                reply_serial: Serial::new(
                    reply_serial.ok_or_else(|| Error::new(ErrorKind::MissingReplySerial))?,
                )
                .map_err(|_| Error::new(ErrorKind::ZeroReplySerial))?,
            },
            3 => MessageKind::Error {
                error_name: error_name.ok_or_else(|| Error::new(ErrorKind::MissingErrorName))?,
                reply_serial: Serial::new(
                    reply_serial.ok_or_else(|| Error::new(ErrorKind::MissingReplySerial))?,
                )
                .map_err(|_| Error::new(ErrorKind::ZeroReplySerial))?,
            },
            4 => MessageKind::Signal {
                path: path.ok_or_else(|| Error::new(ErrorKind::MissingPath))?,
                interface: interface.ok_or_else(|| Error::new(ErrorKind::MissingInterface))?,
                member: member.ok_or_else(|| Error::new(ErrorKind::MissingMember))?,
            },
            other => return Err(Error::new(ErrorKind::InvalidMessageType(other))),
        };

        header_iter.align_to(8)?;
        let header_len = header_iter.position();
        let total_len = header_len + body_length as usize;
        if bytes.len() < total_len {
            return Err(Error::new(ErrorKind::MissingMessage));
        }

        let body_bytes = &bytes[header_len..total_len];
        let body = crate::decode::read_body(body_bytes, endianness, signature.as_signature())?;

        let message = Message {
            kind,
            flags: Flags::from_bits_truncate(flags_byte),
            serial,
            sender,
            destination,
            body,
        };
        Ok((message, total_len))
    }
}

/// Work out how many bytes the message starting at `bytes[0]` will occupy
/// once fully received, reading only the fixed prefix and the
/// header-fields array's own length word. Returns `None` if fewer than
/// 16 bytes (that prefix plus the array's length word) have arrived yet,
/// so a partial header-fields array or body never reaches a full decode
/// attempt and can't surface a misleading [`ErrorKind::BufferUnderflow`].
fn peek_message_len(bytes: &[u8]) -> Result<Option<usize>> {
    if bytes.len() < 16 {
        return Ok(None);
    }
    let endianness = Endianness::from_wire_byte(bytes[0])?;
    let read_u32 = |at: usize| -> u32 {
        let word: [u8; 4] = bytes[at..at + 4].try_into().unwrap();
        if endianness.is_little() {
            u32::from_le_bytes(word)
        } else {
            u32::from_be_bytes(word)
        }
    };
    let body_length = read_u32(4) as usize;
    let fields_len = read_u32(12) as usize;
    let header_len = 16 + fields_len;
    let header_len = header_len + crate::buf::padding_to(header_len, 8);
    Ok(Some(header_len + body_length))
}

/// Extract complete messages from a growing byte buffer, used by a
/// connection's `parse` entry point to frame a byte stream into messages.
#[derive(Debug, Default)]
pub struct Frame {
    pending: Vec<u8>,
}

impl Frame {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    /// Feed newly received bytes in.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Try to pull one complete message out of the buffered bytes. Returns
    /// `Ok(None)` if more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        let Some(total_len) = peek_message_len(&self.pending)? else {
            return Ok(None);
        };
        if self.pending.len() < total_len {
            return Ok(None);
        }
        let (message, consumed) = Message::parse(&self.pending)?;
        self.pending.drain(..consumed);
        Ok(Some(message))
    }
}
