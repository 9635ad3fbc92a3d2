//! Typed, structured encoding of D-Bus values into a [`Buffer`].

use crate::buf::{Buffer, MAX_ARRAY_LENGTH};
use crate::error::{Error, ErrorKind, Result};
use crate::object_path::ObjectPath;
use crate::signature::{Signature, SignatureBuf};
use crate::ty;
use crate::variant::Variant;

/// Whether values are written in little-endian or big-endian byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endianness = Endianness::Little;
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endianness = Endianness::Big;

    pub(crate) fn is_little(self) -> bool {
        matches!(self, Endianness::Little)
    }

    pub(crate) fn wire_byte(self) -> u8 {
        match self {
            Endianness::Little => b'l',
            Endianness::Big => b'B',
        }
    }

    pub(crate) fn from_wire_byte(byte: u8) -> Result<Self> {
        match byte {
            b'l' => Ok(Endianness::Little),
            b'B' => Ok(Endianness::Big),
            other => Err(Error::new(ErrorKind::InvalidEndianness(other))),
        }
    }
}

/// Encodes [`Variant`] values into a byte buffer, tracking alignment and
/// accumulating the signature of what has been written so far.
pub struct Marshaller {
    buf: Buffer,
    endianness: Endianness,
    signature: Vec<u8>,
}

impl Marshaller {
    pub fn new(endianness: Endianness) -> Self {
        Self {
            buf: Buffer::new(),
            endianness,
            signature: Vec::new(),
        }
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn signature(&self) -> &Signature {
        Signature::new_unchecked(&self.signature)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf.into_vec()
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Append a value, validating that it is a legal D-Bus value (array
    /// length limits, valid strings, etc). Updates the accumulated
    /// signature.
    pub fn write(&mut self, value: &Variant) -> Result<()> {
        self.signature.extend_from_slice(value.signature().as_bytes());
        self.write_inner(value)
    }

    fn write_inner(&mut self, value: &Variant) -> Result<()> {
        match value {
            Variant::Byte(v) => self.buf.push(*v),
            Variant::Boolean(v) => self.write_u32(*v as u32),
            Variant::Int16(v) => self.write_i16(*v),
            Variant::UInt16(v) => self.write_u16(*v),
            Variant::Int32(v) => self.write_i32(*v),
            Variant::UInt32(v) => self.write_u32(*v),
            Variant::Int64(v) => self.write_i64(*v),
            Variant::UInt64(v) => self.write_u64(*v),
            Variant::Double(v) => self.write_f64(*v),
            Variant::UnixFd(v) => self.write_u32(*v),
            Variant::String(s) => self.write_string(s.as_bytes())?,
            Variant::ObjectPath(p) => self.write_string(p.as_bytes())?,
            Variant::Signature(s) => self.write_signature(s.as_signature())?,
            Variant::Array(element_sig, items) => self.write_array(element_sig, items)?,
            Variant::Struct(fields) => self.write_struct(fields)?,
            Variant::Dict(key_sig, value_sig, entries) => {
                self.write_dict(key_sig, value_sig, entries)?
            }
            Variant::Variant(inner) => self.write_variant(inner)?,
        }
        Ok(())
    }

    fn write_u16(&mut self, v: u16) {
        self.buf.align_mut(2);
        let bytes = if self.endianness.is_little() {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        self.buf.extend_from_slice(&bytes);
    }

    fn write_i16(&mut self, v: i16) {
        self.write_u16(v as u16);
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.align_mut(4);
        let bytes = if self.endianness.is_little() {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        self.buf.extend_from_slice(&bytes);
    }

    fn write_i32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.align_mut(8);
        let bytes = if self.endianness.is_little() {
            v.to_le_bytes()
        } else {
            v.to_be_bytes()
        };
        self.buf.extend_from_slice(&bytes);
    }

    fn write_i64(&mut self, v: i64) {
        self.write_u64(v as u64);
    }

    fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    fn write_string(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > u32::MAX as usize {
            return Err(Error::new(ErrorKind::ArrayTooLong(u32::MAX)));
        }
        self.write_u32(bytes.len() as u32);
        self.buf.extend_from_slice_nul(bytes);
        Ok(())
    }

    fn write_signature(&mut self, sig: &Signature) -> Result<()> {
        if sig.len() > 255 {
            return Err(Error::new(ErrorKind::SignatureMismatch));
        }
        self.buf.push(sig.len() as u8);
        self.buf.extend_from_slice_nul(sig.as_bytes());
        Ok(())
    }

    fn write_array(&mut self, element_sig: &Signature, items: &[Variant]) -> Result<()> {
        self.buf.align_mut(4);
        let length_offset = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 4]);

        let element_align = ty::alignment(element_sig.as_bytes()[0]) as usize;
        self.buf.align_mut(element_align);
        let start = self.buf.len();

        for item in items {
            self.write_inner(item)?;
        }

        let array_len = self.buf.len() - start;
        if array_len > MAX_ARRAY_LENGTH as usize {
            return Err(Error::new(ErrorKind::ArrayTooLong(array_len as u32)));
        }
        self.buf
            .patch_u32_at(length_offset, array_len as u32, self.endianness.is_little());
        Ok(())
    }

    fn write_struct(&mut self, fields: &[Variant]) -> Result<()> {
        self.buf.align_mut(8);
        for field in fields {
            self.write_inner(field)?;
        }
        Ok(())
    }

    fn write_dict(
        &mut self,
        key_sig: &Signature,
        value_sig: &Signature,
        entries: &[(Variant, Variant)],
    ) -> Result<()> {
        self.buf.align_mut(4);
        let length_offset = self.buf.len();
        self.buf.extend_from_slice(&[0u8; 4]);

        self.buf.align_mut(8);
        let start = self.buf.len();

        for (key, value) in entries {
            self.buf.align_mut(8);
            debug_assert_eq!(&key.signature().as_bytes(), &key_sig.as_bytes());
            debug_assert_eq!(&value.signature().as_bytes(), &value_sig.as_bytes());
            self.write_inner(key)?;
            self.write_inner(value)?;
        }

        let array_len = self.buf.len() - start;
        if array_len > MAX_ARRAY_LENGTH as usize {
            return Err(Error::new(ErrorKind::ArrayTooLong(array_len as u32)));
        }
        self.buf
            .patch_u32_at(length_offset, array_len as u32, self.endianness.is_little());
        Ok(())
    }

    fn write_variant(&mut self, inner: &Variant) -> Result<()> {
        let sig = inner.signature();
        self.write_signature(sig.as_signature())?;
        self.write_inner(inner)
    }
}

/// Compose a D-Bus object path as a `Variant::ObjectPath` convenience.
pub fn object_path_variant(path: &ObjectPath) -> Variant {
    Variant::ObjectPath(path.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Signature;

    /// Scenario S2: struct `(uy)` with `(0xD78A45C2, 0xDE)` little-endian.
    #[test]
    fn s2_marshal_struct() {
        let mut m = Marshaller::new(Endianness::Little);
        m.write(&Variant::Struct(vec![
            Variant::UInt32(0xD78A45C2),
            Variant::Byte(0xDE),
        ]))
        .unwrap();
        assert_eq!(m.as_slice(), &[0xC2, 0x45, 0x8A, 0xD7, 0xDE]);
    }

    /// Scenario S3: `a(uy)` with two identical struct elements.
    #[test]
    fn s3_marshal_array_of_struct() {
        let mut m = Marshaller::new(Endianness::Little);
        let element = || Variant::Struct(vec![Variant::UInt32(0xD78A45C2), Variant::Byte(0xDE)]);
        m.write(&Variant::Array(
            Signature::new(b"(uy)").unwrap().to_owned(),
            vec![element(), element()],
        ))
        .unwrap();
        assert_eq!(
            m.as_slice(),
            &[
                0x0D, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC2, 0x45, 0x8A, 0xD7, 0xDE, 0x00,
                0x00, 0x00, 0xC2, 0x45, 0x8A, 0xD7, 0xDE
            ]
        );
    }

    /// Scenario S4: variant `v` holding a `u32`.
    #[test]
    fn s4_marshal_variant() {
        let mut m = Marshaller::new(Endianness::Little);
        m.write(&Variant::Variant(Box::new(Variant::UInt32(0xD78A45C2))))
            .unwrap();
        assert_eq!(m.as_slice(), &[0x01, 0x75, 0x00, 0x00, 0xC2, 0x45, 0x8A, 0xD7]);
    }

    quickcheck::quickcheck! {
        /// Any scalar value marshalled then decoded comes back unchanged,
        /// in either byte order.
        fn prim_round_trips(n: u32, little: bool) -> bool {
            let endianness = if little { Endianness::Little } else { Endianness::Big };
            let value = Variant::UInt32(n);
            let mut m = Marshaller::new(endianness);
            m.write(&value).unwrap();
            let decoded = crate::decode::read_body(m.as_slice(), endianness, m.signature()).unwrap();
            decoded == vec![value]
        }

        fn string_round_trips(s: String) -> bool {
            if s.contains('\0') {
                return true;
            }
            let value = Variant::String(s.into());
            let mut m = Marshaller::new(Endianness::Little);
            m.write(&value).unwrap();
            let decoded = crate::decode::read_body(m.as_slice(), Endianness::Little, m.signature()).unwrap();
            decoded == vec![value]
        }
    }
}
