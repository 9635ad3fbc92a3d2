use super::ObjectPathError;

/// Validate that `bytes` is a well-formed D-Bus object path:
/// begins with `/`, each segment is non-empty and `[A-Za-z0-9_]+`, and
/// there is no trailing `/` except for the root path `/` itself.
pub(super) fn validate(bytes: &[u8]) -> Result<(), ObjectPathError> {
    if bytes.first() != Some(&b'/') {
        return Err(ObjectPathError);
    }

    if bytes == b"/" {
        return Ok(());
    }

    if bytes.last() == Some(&b'/') {
        return Err(ObjectPathError);
    }

    for segment in bytes[1..].split(|&b| b == b'/') {
        if segment.is_empty() {
            return Err(ObjectPathError);
        }
        if !segment
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'_')
        {
            return Err(ObjectPathError);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_valid() {
        assert!(validate(b"/").is_ok());
    }

    #[test]
    fn segments_must_be_word_chars() {
        assert!(validate(b"/foo/bar_baz/Qux0").is_ok());
        assert!(validate(b"/foo/bar-baz").is_err());
    }

    #[test]
    fn must_start_with_slash() {
        assert!(validate(b"foo").is_err());
    }

    #[test]
    fn no_trailing_slash() {
        assert!(validate(b"/foo/").is_err());
    }

    #[test]
    fn no_empty_segments() {
        assert!(validate(b"/foo//bar").is_err());
    }
}
