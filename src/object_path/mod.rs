//! Parsed and validated D-Bus object paths.

pub use self::object_path::ObjectPath;
mod object_path;

pub use self::object_path_buf::ObjectPathBuf;
mod object_path_buf;

pub use self::error::ObjectPathError;
mod error;

pub use self::iter::Iter;
mod iter;

mod validation;
