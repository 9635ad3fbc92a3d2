//! The D-Bus type-code alphabet: alignment and fixed/variable size.

/// A single D-Bus type code.
pub const BYTE: u8 = b'y';
pub const BOOLEAN: u8 = b'b';
pub const INT16: u8 = b'n';
pub const UINT16: u8 = b'q';
pub const INT32: u8 = b'i';
pub const UINT32: u8 = b'u';
pub const INT64: u8 = b'x';
pub const UINT64: u8 = b't';
pub const DOUBLE: u8 = b'd';
pub const STRING: u8 = b's';
pub const OBJECT_PATH: u8 = b'o';
pub const SIGNATURE: u8 = b'g';
pub const UNIX_FD: u8 = b'h';
pub const ARRAY: u8 = b'a';
pub const STRUCT_OPEN: u8 = b'(';
pub const STRUCT_CLOSE: u8 = b')';
pub const DICT_OPEN: u8 = b'{';
pub const DICT_CLOSE: u8 = b'}';
pub const VARIANT: u8 = b'v';

/// The natural alignment, in bytes, of a type code.
///
/// Container open codes (`a`, `(`, `{`) report the alignment of the
/// container itself (arrays align their length to 4; structs and dict
/// entries always align to 8). `v` aligns to 1 (its own signature byte).
pub const fn alignment(code: u8) -> u8 {
    match code {
        BYTE | SIGNATURE | VARIANT => 1,
        INT16 | UINT16 => 2,
        INT32 | UINT32 | BOOLEAN | ARRAY | UNIX_FD => 4,
        INT64 | UINT64 | DOUBLE | STRUCT_OPEN | DICT_OPEN => 8,
        STRING | OBJECT_PATH => 4,
        _ => 1,
    }
}

/// Whether a type code is a basic (non-container) type that may appear
/// as a dict-entry key or as the argument of a match rule.
pub const fn is_basic(code: u8) -> bool {
    matches!(
        code,
        BYTE | BOOLEAN
            | INT16
            | UINT16
            | INT32
            | UINT32
            | INT64
            | UINT64
            | DOUBLE
            | STRING
            | OBJECT_PATH
            | SIGNATURE
            | UNIX_FD
    )
}

/// Whether a type code starts a container type.
pub const fn is_container_open(code: u8) -> bool {
    matches!(code, ARRAY | STRUCT_OPEN | DICT_OPEN | VARIANT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignments() {
        assert_eq!(alignment(BYTE), 1);
        assert_eq!(alignment(UINT16), 2);
        assert_eq!(alignment(UINT32), 4);
        assert_eq!(alignment(UINT64), 8);
        assert_eq!(alignment(DOUBLE), 8);
        assert_eq!(alignment(STRUCT_OPEN), 8);
        assert_eq!(alignment(DICT_OPEN), 8);
        assert_eq!(alignment(ARRAY), 4);
        assert_eq!(alignment(STRING), 4);
        assert_eq!(alignment(VARIANT), 1);
    }

    #[test]
    fn basic_types() {
        assert!(is_basic(BYTE));
        assert!(is_basic(STRING));
        assert!(!is_basic(ARRAY));
        assert!(!is_basic(VARIANT));
    }
}
