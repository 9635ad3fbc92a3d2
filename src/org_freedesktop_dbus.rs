//! Well-known names and types associated with the `org.freedesktop.DBus`
//! bus interface itself.

use crate::error::{Error, ErrorKind};

/// Well known destination name.
pub const DESTINATION: &str = "org.freedesktop.DBus";

/// Well known interface name.
pub const INTERFACE: &str = "org.freedesktop.DBus";

/// Well known D-Bus object path.
pub const PATH: &str = "/org/freedesktop/DBus";

/// Standard error names a bus or peer may return.
pub mod error_name {
    pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
    pub const UNKNOWN_INTERFACE: &str = "org.freedesktop.DBus.Error.UnknownInterface";
    pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
    pub const UNKNOWN_PROPERTY: &str = "org.freedesktop.DBus.Error.UnknownProperty";
    pub const PROPERTY_READ_ONLY: &str = "org.freedesktop.DBus.Error.PropertyReadOnly";
    pub const PROPERTY_WRITE_ONLY: &str = "org.freedesktop.DBus.Error.PropertyWriteOnly";
    pub const INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
    pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
    pub const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
    pub const NO_REPLY: &str = "org.freedesktop.DBus.Error.NoReply";
}

bitflags::bitflags! {
    /// Flags passed to a `RequestName` call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NameFlag: u32 {
        /// If application A specifies this flag and succeeds in becoming the
        /// owner of the name, and application B later calls `RequestName`
        /// with [`NameFlag::REPLACE_EXISTING`], A loses ownership in favor
        /// of B.
        const ALLOW_REPLACEMENT = 1;
        /// Replace the current owner if there is one and it allows
        /// replacement, instead of queueing.
        const REPLACE_EXISTING = 2;
        /// Fail instead of queueing if the name already has an owner.
        const DO_NOT_QUEUE = 4;
    }
}

/// The reply to a `RequestName` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NameReply {
    /// The caller is now the primary owner of the name.
    PrimaryOwner = 1,
    /// The name had an owner and the caller was queued behind it.
    InQueue = 2,
    /// The name had an owner, [`NameFlag::DO_NOT_QUEUE`] was given, and
    /// replacement was not possible.
    Exists = 3,
    /// The caller already owns this name.
    AlreadyOwner = 4,
}

impl TryFrom<u32> for NameReply {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Error> {
        match value {
            1 => Ok(Self::PrimaryOwner),
            2 => Ok(Self::InQueue),
            3 => Ok(Self::Exists),
            4 => Ok(Self::AlreadyOwner),
            other => Err(Error::new(ErrorKind::InvalidNameReply(other))),
        }
    }
}

/// The reply to a `ReleaseName` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReleaseNameReply {
    /// The name was released.
    Released = 1,
    /// The given name was not known to the bus.
    NonExistent = 2,
    /// The caller was not the owner of the name.
    NotOwner = 3,
}

impl TryFrom<u32> for ReleaseNameReply {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Error> {
        match value {
            1 => Ok(Self::Released),
            2 => Ok(Self::NonExistent),
            3 => Ok(Self::NotOwner),
            other => Err(Error::new(ErrorKind::InvalidNameReply(other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_flag_bits() {
        let flags = NameFlag::ALLOW_REPLACEMENT | NameFlag::DO_NOT_QUEUE;
        assert!(flags.contains(NameFlag::ALLOW_REPLACEMENT));
        assert!(!flags.contains(NameFlag::REPLACE_EXISTING));
    }

    #[test]
    fn name_reply_round_trips() {
        assert_eq!(NameReply::try_from(1).unwrap(), NameReply::PrimaryOwner);
        assert!(NameReply::try_from(99).is_err());
    }
}
