use core::fmt;

/// An error constructing an [`ObjectPath`][super::ObjectPath].
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct ObjectPathError;

impl fmt::Display for ObjectPathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid D-Bus object path")
    }
}

impl std::error::Error for ObjectPathError {}
