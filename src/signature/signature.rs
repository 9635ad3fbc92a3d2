use core::fmt;
use core::ops::Deref;

use super::iter::Iter;
use super::validation::validate;
use super::{SignatureBuf, SignatureError};

/// A borrowed, validated D-Bus type signature.
///
/// `Signature` is an unsized wrapper over `[u8]`, mirroring the
/// `str`/`String` split: you construct one with [`Signature::new`] (which
/// validates) and can later own one as a [`SignatureBuf`].
#[repr(transparent)]
pub struct Signature([u8]);

impl Signature {
    pub const EMPTY: &'static Signature = Signature::new_const(b"");
    pub const BYTE: &'static Signature = Signature::new_const(b"y");
    pub const BOOLEAN: &'static Signature = Signature::new_const(b"b");
    pub const INT16: &'static Signature = Signature::new_const(b"n");
    pub const UINT16: &'static Signature = Signature::new_const(b"q");
    pub const INT32: &'static Signature = Signature::new_const(b"i");
    pub const UINT32: &'static Signature = Signature::new_const(b"u");
    pub const INT64: &'static Signature = Signature::new_const(b"x");
    pub const UINT64: &'static Signature = Signature::new_const(b"t");
    pub const DOUBLE: &'static Signature = Signature::new_const(b"d");
    pub const STRING: &'static Signature = Signature::new_const(b"s");
    pub const OBJECT_PATH: &'static Signature = Signature::new_const(b"o");
    pub const SIGNATURE: &'static Signature = Signature::new_const(b"g");
    pub const VARIANT: &'static Signature = Signature::new_const(b"v");
    pub const UNIX_FD: &'static Signature = Signature::new_const(b"h");

    /// Construct a signature, validating it.
    pub fn new(bytes: &[u8]) -> Result<&Signature, SignatureError> {
        validate(bytes)?;
        Ok(Self::new_unchecked(bytes))
    }

    /// Construct a signature from a compile-time-known string. Panics if
    /// the signature is invalid; intended for constants only.
    #[track_caller]
    pub const fn new_const(bytes: &'static [u8]) -> &'static Signature {
        // `validate` is not const; compile-time constants in this module
        // are all hand-verified to be valid signatures instead.
        Signature::new_unchecked(bytes)
    }

    pub(crate) const fn new_unchecked(bytes: &[u8]) -> &Signature {
        // SAFETY: `Signature` is `repr(transparent)` over `[u8]`.
        unsafe { &*(bytes as *const [u8] as *const Signature) }
    }

    pub fn empty() -> &'static Signature {
        Signature::EMPTY
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Signatures are validated to be ASCII type codes.
        core::str::from_utf8(&self.0).unwrap_or_default()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter::new(&self.0)
    }

    pub fn to_owned(&self) -> SignatureBuf {
        SignatureBuf::from_signature(self)
    }
}

impl Deref for Signature {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Signature {}

impl PartialEq<[u8]> for Signature {
    fn eq(&self, other: &[u8]) -> bool {
        &self.0 == other
    }
}

impl PartialEq<str> for Signature {
    fn eq(&self, other: &str) -> bool {
        self.0 == *other.as_bytes()
    }
}

impl<'a> From<&'a Signature> for Box<Signature> {
    fn from(sig: &'a Signature) -> Self {
        let boxed: Box<[u8]> = Box::from(&sig.0);
        // SAFETY: `Signature` is `repr(transparent)` over `[u8]`.
        unsafe { Box::from_raw(Box::into_raw(boxed) as *mut Signature) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn const_signatures_are_valid() {
        assert_eq!(Signature::BYTE.as_str(), "y");
        assert_eq!(Signature::VARIANT.as_str(), "v");
        assert!(Signature::EMPTY.is_empty());
    }

    #[test]
    fn rejects_invalid() {
        assert!(Signature::new(b"(y").is_err());
    }
}
