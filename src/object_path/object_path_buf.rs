use core::borrow::Borrow;
use core::fmt;
use core::ops::Deref;

use super::{ObjectPath, ObjectPathError};

/// An owned, validated D-Bus object path.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ObjectPathBuf {
    data: Vec<u8>,
}

impl ObjectPathBuf {
    pub fn new(bytes: &[u8]) -> Result<Self, ObjectPathError> {
        ObjectPath::new(bytes)?;
        Ok(Self { data: bytes.to_vec() })
    }

    pub(crate) fn from_path(path: &ObjectPath) -> Self {
        Self {
            data: path.as_bytes().to_vec(),
        }
    }

    pub fn as_object_path(&self) -> &ObjectPath {
        ObjectPath::new_unchecked(&self.data)
    }
}

impl Deref for ObjectPathBuf {
    type Target = ObjectPath;

    fn deref(&self) -> &ObjectPath {
        self.as_object_path()
    }
}

impl Borrow<ObjectPath> for ObjectPathBuf {
    fn borrow(&self) -> &ObjectPath {
        self.as_object_path()
    }
}

impl fmt::Debug for ObjectPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_object_path(), f)
    }
}

impl fmt::Display for ObjectPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.as_object_path(), f)
    }
}

impl PartialEq<ObjectPath> for ObjectPathBuf {
    fn eq(&self, other: &ObjectPath) -> bool {
        self.as_object_path() == other
    }
}

impl TryFrom<&str> for ObjectPathBuf {
    type Error = ObjectPathError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ObjectPathBuf::new(value.as_bytes())
    }
}
