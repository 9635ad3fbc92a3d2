use core::borrow::Borrow;
use core::fmt;
use core::ops::Deref;

use super::{Signature, SignatureError};

/// An owned, validated D-Bus type signature.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SignatureBuf {
    data: Vec<u8>,
}

impl SignatureBuf {
    pub fn new(bytes: &[u8]) -> Result<Self, SignatureError> {
        Signature::new(bytes)?;
        Ok(Self { data: bytes.to_vec() })
    }

    pub(crate) fn from_signature(sig: &Signature) -> Self {
        Self {
            data: sig.as_bytes().to_vec(),
        }
    }

    pub fn as_signature(&self) -> &Signature {
        Signature::new_unchecked(&self.data)
    }

    /// Append another signature's bytes; caller is responsible for the
    /// result remaining well-formed (builders validate before use).
    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}

impl Deref for SignatureBuf {
    type Target = Signature;

    fn deref(&self) -> &Signature {
        self.as_signature()
    }
}

impl Borrow<Signature> for SignatureBuf {
    fn borrow(&self) -> &Signature {
        self.as_signature()
    }
}

impl fmt::Debug for SignatureBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_signature(), f)
    }
}

impl fmt::Display for SignatureBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_signature(), f)
    }
}

impl Default for SignatureBuf {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

impl PartialEq<Signature> for SignatureBuf {
    fn eq(&self, other: &Signature) -> bool {
        self.as_signature() == other
    }
}
