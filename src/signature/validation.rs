use super::error::SignatureError;
use super::{MAX_DEPTH, MAX_SIGNATURE};
use crate::ty;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Struct,
    Dict,
}

/// Validate that `bytes` is a well-formed sequence of complete D-Bus type
/// trees. An empty signature is valid (a body with no arguments).
pub(super) fn validate(bytes: &[u8]) -> Result<(), SignatureError> {
    if bytes.len() > MAX_SIGNATURE {
        return Err(SignatureError::SignatureTooLong);
    }

    let mut stack: [(Kind, u8); MAX_DEPTH] = [(Kind::Struct, 0); MAX_DEPTH];
    let mut depth = 0usize;

    let mut i = 0usize;
    while i < bytes.len() {
        let code = bytes[i];
        i += 1;

        match code {
            ty::ARRAY => {
                if i >= bytes.len() {
                    return Err(SignatureError::MissingArrayElementType);
                }
                if depth > 0 && stack[depth - 1].0 == Kind::Dict && stack[depth - 1].1 == 0 {
                    return Err(SignatureError::DictKeyMustBeBasicType);
                }
                if depth > 0 && stack[depth - 1].0 == Kind::Dict {
                    stack[depth - 1].1 += 1;
                }
                // The element type is validated by the next loop iteration;
                // `a` itself contributes no further stack entry.
                continue;
            }
            ty::STRUCT_OPEN => {
                if depth > 0 && stack[depth - 1].0 == Kind::Dict && stack[depth - 1].1 == 0 {
                    return Err(SignatureError::DictKeyMustBeBasicType);
                }
                if depth >= MAX_DEPTH {
                    return Err(SignatureError::ExceededMaximumDepth);
                }
                if depth > 0 && stack[depth - 1].0 == Kind::Dict {
                    stack[depth - 1].1 += 1;
                }
                stack[depth] = (Kind::Struct, 0);
                depth += 1;
            }
            ty::STRUCT_CLOSE => {
                if depth == 0 || stack[depth - 1].0 != Kind::Struct {
                    return Err(SignatureError::UnexpectedStructClose);
                }
                let (_, count) = stack[depth - 1];
                depth -= 1;
                if count == 0 {
                    return Err(SignatureError::StructHasNoFields);
                }
            }
            ty::DICT_OPEN => {
                // Placement (must directly follow `a`) is checked in a
                // second pass below, since this loop doesn't track the
                // preceding byte.
                if depth > 0 && stack[depth - 1].0 == Kind::Dict && stack[depth - 1].1 == 0 {
                    return Err(SignatureError::DictKeyMustBeBasicType);
                }
                if depth >= MAX_DEPTH {
                    return Err(SignatureError::ExceededMaximumDepth);
                }
                if depth > 0 && stack[depth - 1].0 == Kind::Dict {
                    stack[depth - 1].1 += 1;
                }
                stack[depth] = (Kind::Dict, 0);
                depth += 1;
            }
            ty::DICT_CLOSE => {
                if depth == 0 || stack[depth - 1].0 != Kind::Dict {
                    return Err(SignatureError::UnexpectedDictClose);
                }
                let (_, count) = stack[depth - 1];
                depth -= 1;
                match count {
                    0 => return Err(SignatureError::DictEntryHasNoFields),
                    1 => return Err(SignatureError::DictEntryHasOnlyOneField),
                    2 => {}
                    _ => return Err(SignatureError::DictEntryHasTooManyFields),
                }
            }
            ty::VARIANT
            | ty::BYTE
            | ty::BOOLEAN
            | ty::INT16
            | ty::UINT16
            | ty::INT32
            | ty::UINT32
            | ty::INT64
            | ty::UINT64
            | ty::DOUBLE
            | ty::STRING
            | ty::OBJECT_PATH
            | ty::SIGNATURE
            | ty::UNIX_FD => {
                if depth > 0 {
                    let (kind, count) = stack[depth - 1];
                    if kind == Kind::Dict {
                        if count == 0 && !ty::is_basic(code) {
                            return Err(SignatureError::DictKeyMustBeBasicType);
                        }
                        if count >= 2 {
                            return Err(SignatureError::DictEntryHasTooManyFields);
                        }
                    }
                    stack[depth - 1].1 = count + 1;
                }
            }
            other => return Err(SignatureError::UnknownTypeCode(other)),
        }
    }

    if depth > 0 {
        return match stack[depth - 1].0 {
            Kind::Struct => Err(SignatureError::StructStartedButNotEnded),
            Kind::Dict => Err(SignatureError::DictStartedButNotEnded),
        };
    }

    validate_dict_placement(bytes)
}

/// A dict-entry type code (`{`) must only ever occur as the element type
/// of an array (i.e. immediately preceded by `a`, possibly through nested
/// `a` for `aa{..}`). This is checked separately from the bracket-matching
/// pass above since that pass does not track the preceding byte.
fn validate_dict_placement(bytes: &[u8]) -> Result<(), SignatureError> {
    for (i, &code) in bytes.iter().enumerate() {
        if code == ty::DICT_OPEN && (i == 0 || bytes[i - 1] != ty::ARRAY) {
            return Err(SignatureError::DictEntryNotInsideArray);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(s: &[u8]) {
        assert_eq!(validate(s), Ok(()));
    }

    fn err(s: &[u8], expect: SignatureError) {
        assert_eq!(validate(s), Err(expect));
    }

    #[test]
    fn primitives_and_empty() {
        ok(b"");
        ok(b"y");
        ok(b"s");
        ok(b"you");
    }

    #[test]
    fn arrays_and_structs() {
        ok(b"ay");
        ok(b"a(uy)");
        ok(b"a{sv}");
        ok(b"aa{sv}");
    }

    #[test]
    fn struct_must_have_fields() {
        err(b"()", SignatureError::StructHasNoFields);
    }

    #[test]
    fn dict_entry_must_be_in_array() {
        err(b"{sv}", SignatureError::DictEntryNotInsideArray);
    }

    #[test]
    fn dict_entry_field_counts() {
        err(b"a{s}", SignatureError::DictEntryHasOnlyOneField);
        err(b"a{sss}", SignatureError::DictEntryHasTooManyFields);
    }

    #[test]
    fn dict_key_must_be_basic() {
        err(b"a{(y)v}", SignatureError::DictKeyMustBeBasicType);
    }

    #[test]
    fn unterminated_containers() {
        err(b"(y", SignatureError::StructStartedButNotEnded);
        err(b"a{sv", SignatureError::DictStartedButNotEnded);
    }

    #[test]
    fn unknown_code() {
        err(b"z", SignatureError::UnknownTypeCode(b'z'));
    }

    #[test]
    fn array_needs_element() {
        err(b"a", SignatureError::MissingArrayElementType);
    }
}
