/// An iterator over the segments of an [`ObjectPath`][super::ObjectPath].
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    data: &'a [u8],
}

impl<'a> Iter<'a> {
    pub(super) fn new(bytes: &'a [u8]) -> Self {
        let trimmed = bytes.strip_prefix(b"/").unwrap_or(bytes);
        Self { data: trimmed }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        let end = self.data.iter().position(|&b| b == b'/').unwrap_or(self.data.len());
        let (segment, rest) = self.data.split_at(end);
        self.data = rest.strip_prefix(b"/").unwrap_or(rest);
        // SAFETY-free: object path segments are validated ASCII.
        Some(core::str::from_utf8(segment).unwrap_or(""))
    }
}

impl<'a> DoubleEndedIterator for Iter<'a> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        let start = self.data.iter().rposition(|&b| b == b'/').map(|p| p + 1).unwrap_or(0);
        let segment = &self.data[start..];
        self.data = if start == 0 { &[] } else { &self.data[..start - 1] };
        Some(core::str::from_utf8(segment).unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_segments() {
        let segments: Vec<_> = Iter::new(b"/foo/bar/baz").collect();
        assert_eq!(segments, vec!["foo", "bar", "baz"]);
    }

    #[test]
    fn root_has_no_segments() {
        let segments: Vec<_> = Iter::new(b"/").collect();
        assert!(segments.is_empty());
    }

    #[test]
    fn reverse_iteration() {
        let segments: Vec<_> = Iter::new(b"/foo/bar/baz").rev().collect();
        assert_eq!(segments, vec!["baz", "bar", "foo"]);
    }
}
