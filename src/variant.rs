//! A runtime-typed D-Bus value, used for header fields, `v`-typed
//! arguments, and anywhere a message's shape is not known at compile time.

use crate::object_path::ObjectPathBuf;
use crate::signature::{Signature, SignatureBuf};

/// A single D-Bus value, carrying enough type information to reconstruct
/// its signature.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Variant {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(Box<str>),
    ObjectPath(ObjectPathBuf),
    Signature(SignatureBuf),
    UnixFd(u32),
    Array(SignatureBuf, Vec<Variant>),
    Struct(Vec<Variant>),
    Dict(SignatureBuf, SignatureBuf, Vec<(Variant, Variant)>),
    Variant(Box<Variant>),
}

impl Variant {
    /// The signature of this value.
    pub fn signature(&self) -> SignatureBuf {
        match self {
            Variant::Byte(_) => Signature::BYTE.to_owned(),
            Variant::Boolean(_) => Signature::BOOLEAN.to_owned(),
            Variant::Int16(_) => Signature::INT16.to_owned(),
            Variant::UInt16(_) => Signature::UINT16.to_owned(),
            Variant::Int32(_) => Signature::INT32.to_owned(),
            Variant::UInt32(_) => Signature::UINT32.to_owned(),
            Variant::Int64(_) => Signature::INT64.to_owned(),
            Variant::UInt64(_) => Signature::UINT64.to_owned(),
            Variant::Double(_) => Signature::DOUBLE.to_owned(),
            Variant::String(_) => Signature::STRING.to_owned(),
            Variant::ObjectPath(_) => Signature::OBJECT_PATH.to_owned(),
            Variant::Signature(_) => Signature::SIGNATURE.to_owned(),
            Variant::UnixFd(_) => Signature::UNIX_FD.to_owned(),
            Variant::Variant(_) => Signature::VARIANT.to_owned(),
            Variant::Array(element_sig, _) => {
                let mut buf = vec![b'a'];
                buf.extend_from_slice(element_sig.as_bytes());
                SignatureBuf::new(&buf).unwrap_or_default()
            }
            Variant::Struct(fields) => {
                let mut buf = vec![b'('];
                for field in fields {
                    buf.extend_from_slice(field.signature().as_bytes());
                }
                buf.push(b')');
                SignatureBuf::new(&buf).unwrap_or_default()
            }
            Variant::Dict(key_sig, value_sig, _) => {
                let mut buf = vec![b'a', b'{'];
                buf.extend_from_slice(key_sig.as_bytes());
                buf.extend_from_slice(value_sig.as_bytes());
                buf.push(b'}');
                SignatureBuf::new(&buf).unwrap_or_default()
            }
        }
    }

    /// The string carried by this value, unwrapping through any number of
    /// nested `v`-typed wrappers (a match-rule arg predicate against a
    /// signal argument sees through these the same way, per the
    /// `org.freedesktop.DBus` match rule semantics).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            Variant::ObjectPath(p) => Some(p.as_str()),
            Variant::Signature(s) => Some(s.as_signature().as_str()),
            Variant::Variant(inner) => inner.as_str(),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Variant::UInt32(v) => Some(*v),
            Variant::UnixFd(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<u8> for Variant {
    fn from(v: u8) -> Self {
        Variant::Byte(v)
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Boolean(v)
    }
}

impl From<u32> for Variant {
    fn from(v: u32) -> Self {
        Variant::UInt32(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int32(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.into())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v.into_boxed_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures() {
        assert_eq!(Variant::from(1u32).signature().as_signature(), Signature::UINT32);
        assert_eq!(Variant::from("hi").signature().as_signature(), Signature::STRING);
        let arr = Variant::Array(Signature::UINT32.to_owned(), vec![Variant::UInt32(1)]);
        assert_eq!(arr.signature().as_str(), "au");
        let st = Variant::Struct(vec![Variant::UInt32(1), Variant::Byte(2)]);
        assert_eq!(st.signature().as_str(), "(uy)");
    }

    #[test]
    fn as_str_sees_through_nested_variants() {
        let wrapped = Variant::Variant(Box::new(Variant::Variant(Box::new(Variant::from("hello")))));
        assert_eq!(wrapped.as_str(), Some("hello"));
        assert_eq!(Variant::UInt32(1).as_str(), None);
    }
}
