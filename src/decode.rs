//! Typed, structured decoding of D-Bus values from a byte slice.

use crate::buf::padding_to;
use crate::error::{Error, ErrorKind, Result};
use crate::marshal::Endianness;
use crate::object_path::ObjectPathBuf;
use crate::signature::{Signature, SignatureBuf, Type};
use crate::variant::Variant;

/// A cursor over a byte slice, decoding values according to a signature.
#[derive(Debug, Clone)]
pub struct Iter<'de> {
    data: &'de [u8],
    pos: usize,
    endianness: Endianness,
}

impl<'de> Iter<'de> {
    pub fn new(data: &'de [u8], endianness: Endianness) -> Self {
        Self {
            data,
            pos: 0,
            endianness,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub(crate) fn align_to(&mut self, align: usize) -> Result<()> {
        self.align(align)
    }

    fn align(&mut self, align: usize) -> Result<()> {
        let pad = padding_to(self.pos, align);
        if self.pos + pad > self.data.len() {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        }
        self.pos += pad;
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'de [u8]> {
        if self.pos + len > self.data.len() {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u32()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.align(2)?;
        let bytes: [u8; 2] = self.take(2)?.try_into().unwrap();
        Ok(if self.endianness.is_little() {
            u16::from_le_bytes(bytes)
        } else {
            u16::from_be_bytes(bytes)
        })
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.align(4)?;
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(if self.endianness.is_little() {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.align(8)?;
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(if self.endianness.is_little() {
            u64::from_le_bytes(bytes)
        } else {
            u64::from_be_bytes(bytes)
        })
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_str(&mut self) -> Result<&'de str> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        let nul = self.take(1)?;
        if nul != [0] {
            return Err(Error::new(ErrorKind::NotNullTerminated));
        }
        core::str::from_utf8(bytes).map_err(|_| Error::new(ErrorKind::Utf8Error))
    }

    pub fn read_signature(&mut self) -> Result<&'de Signature> {
        let len = self.read_u8()? as usize;
        let bytes = self.take(len)?;
        let nul = self.take(1)?;
        if nul != [0] {
            return Err(Error::new(ErrorKind::NotNullTerminated));
        }
        Ok(Signature::new(bytes)?)
    }

    pub fn read_object_path(&mut self) -> Result<ObjectPathBuf> {
        let s = self.read_str()?;
        Ok(ObjectPathBuf::new(s.as_bytes())?)
    }

    /// Decode a single complete value of type `ty`.
    pub fn read_value(&mut self, ty: Type<'_>) -> Result<Variant> {
        Ok(match ty {
            Type::Basic(crate::ty::BYTE) => Variant::Byte(self.read_u8()?),
            Type::Basic(crate::ty::BOOLEAN) => Variant::Boolean(self.read_bool()?),
            Type::Basic(crate::ty::INT16) => Variant::Int16(self.read_i16()?),
            Type::Basic(crate::ty::UINT16) => Variant::UInt16(self.read_u16()?),
            Type::Basic(crate::ty::INT32) => Variant::Int32(self.read_i32()?),
            Type::Basic(crate::ty::UINT32) => Variant::UInt32(self.read_u32()?),
            Type::Basic(crate::ty::INT64) => Variant::Int64(self.read_i64()?),
            Type::Basic(crate::ty::UINT64) => Variant::UInt64(self.read_u64()?),
            Type::Basic(crate::ty::DOUBLE) => Variant::Double(self.read_f64()?),
            Type::Basic(crate::ty::STRING) => Variant::String(self.read_str()?.into()),
            Type::Basic(crate::ty::OBJECT_PATH) => Variant::ObjectPath(self.read_object_path()?),
            Type::Basic(crate::ty::SIGNATURE) => Variant::Signature(self.read_signature()?.to_owned()),
            Type::Basic(crate::ty::UNIX_FD) => Variant::UnixFd(self.read_u32()?),
            Type::Basic(other) => return Err(Error::new(ErrorKind::UnknownTypeCodeAt(other))),
            Type::Variant => {
                let sig = self.read_signature()?.to_owned();
                let mut inner_types = sig.as_signature().iter();
                let inner_ty = inner_types
                    .next()
                    .ok_or_else(|| Error::new(ErrorKind::SignatureMismatch))?;
                Variant::Variant(Box::new(self.read_value(inner_ty)?))
            }
            Type::Array(element_sig) => self.read_array(element_sig)?,
            Type::Struct(fields_sig) => {
                self.align(8)?;
                let mut fields = Vec::new();
                for field_ty in fields_sig.iter() {
                    fields.push(self.read_value(field_ty)?);
                }
                Variant::Struct(fields)
            }
            Type::Dict(key_sig, value_sig) => {
                self.align(8)?;
                let key_ty = key_sig
                    .iter()
                    .next()
                    .ok_or_else(|| Error::new(ErrorKind::SignatureMismatch))?;
                let value_ty = value_sig
                    .iter()
                    .next()
                    .ok_or_else(|| Error::new(ErrorKind::SignatureMismatch))?;
                let key = self.read_value(key_ty)?;
                let value = self.read_value(value_ty)?;
                Variant::Dict(key_sig.to_owned(), value_sig.to_owned(), vec![(key, value)])
            }
        })
    }

    fn read_array(&mut self, element_sig: &Signature) -> Result<Variant> {
        let byte_len = self.read_u32()? as usize;
        let element_align = crate::ty::alignment(element_sig.as_bytes()[0]) as usize;
        self.align(element_align)?;
        let end = self.pos + byte_len;
        if end > self.data.len() {
            return Err(Error::new(ErrorKind::BufferUnderflow));
        }

        // Dict signatures (`{kv}`) are only ever the element type of an
        // array; fold repeated dict-entries into one `Variant::Dict`.
        if let Some(Type::Dict(key_sig, value_sig)) = element_sig.iter().next() {
            let mut entries = Vec::new();
            while self.pos < end {
                self.align(8)?;
                let key_ty = key_sig.iter().next().unwrap();
                let value_ty = value_sig.iter().next().unwrap();
                let key = self.read_value(key_ty)?;
                let value = self.read_value(value_ty)?;
                entries.push((key, value));
            }
            return Ok(Variant::Dict(key_sig.to_owned(), value_sig.to_owned(), entries));
        }

        let element_ty = element_sig
            .iter()
            .next()
            .ok_or_else(|| Error::new(ErrorKind::SignatureMismatch))?;
        let mut items = Vec::new();
        while self.pos < end {
            items.push(self.read_value(element_ty)?);
        }
        if self.pos != end {
            return Err(Error::new(ErrorKind::SignatureMismatch));
        }
        Ok(Variant::Array(element_sig.to_owned(), items))
    }
}

/// Decode a full value given its top-level signature (used for message
/// bodies, which may have multiple top-level values).
pub fn read_body(data: &[u8], endianness: Endianness, signature: &Signature) -> Result<Vec<Variant>> {
    let mut iter = Iter::new(data, endianness);
    let mut values = Vec::new();
    for ty in signature.iter() {
        values.push(iter.read_value(ty)?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::Marshaller;

    #[test]
    fn round_trip_struct() {
        let value = Variant::Struct(vec![Variant::UInt32(42), Variant::Byte(7)]);
        let mut m = Marshaller::new(Endianness::Little);
        m.write(&value).unwrap();
        let sig = m.signature().to_owned();
        let decoded = read_body(m.as_slice(), Endianness::Little, sig.as_signature()).unwrap();
        assert_eq!(decoded, vec![value]);
    }

    #[test]
    fn round_trip_array_of_dict() {
        let value = Variant::Dict(
            Signature::STRING.to_owned(),
            Signature::VARIANT.to_owned(),
            vec![(
                Variant::String("k".into()),
                Variant::Variant(Box::new(Variant::UInt32(9))),
            )],
        );
        let wrapped = Variant::Array(Signature::new(b"{sv}").unwrap().to_owned(), vec![]);
        let _ = wrapped; // array-of-dict-entry is represented directly as Variant::Dict
        let mut m = Marshaller::new(Endianness::Little);
        m.write(&value).unwrap();
        let sig = m.signature().to_owned();
        let decoded = read_body(m.as_slice(), Endianness::Little, sig.as_signature()).unwrap();
        assert_eq!(decoded, vec![value]);
    }
}
