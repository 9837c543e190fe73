//! Minimal single-span text diff
//!
//! Replacing only the span that actually changed keeps remote carets and
//! the local cursor where they were.

use serde::{Deserialize, Serialize};

/// Replace `delete` chars at `offset` with `insert`. Offsets count `char`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub offset: usize,
    pub delete: usize,
    pub insert: String,
}

impl TextEdit {
    /// Apply the edit to `text`, clamping out-of-range offsets
    pub fn apply(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let start = self.offset.min(chars.len());
        let end = (start + self.delete).min(chars.len());

        let mut out = String::with_capacity(text.len() + self.insert.len());
        out.extend(&chars[..start]);
        out.push_str(&self.insert);
        out.extend(&chars[end..]);
        out
    }
}

/// Compute the smallest single-span edit turning `old` into `new`.
///
/// The common suffix is taken first, then the common prefix of what
/// remains, so an insertion next to a repeated character lands after the
/// shared prefix. Returns `None` when the strings are equal.
pub fn minimal_edit(old: &str, new: &str) -> Option<TextEdit> {
    if old == new {
        return None;
    }

    let old: Vec<char> = old.chars().collect();
    let new: Vec<char> = new.chars().collect();

    let shortest = old.len().min(new.len());
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(shortest)
        .take_while(|(a, b)| a == b)
        .count();

    let bound = shortest - suffix;
    let prefix = old
        .iter()
        .zip(new.iter())
        .take(bound)
        .take_while(|(a, b)| a == b)
        .count();

    Some(TextEdit {
        offset: prefix,
        delete: old.len() - suffix - prefix,
        insert: new[prefix..new.len() - suffix].iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_in_middle() {
        let edit = minimal_edit("The quick fox", "The quick brown fox").unwrap();
        assert_eq!(
            edit,
            TextEdit {
                offset: 9,
                delete: 0,
                insert: " brown".to_string(),
            }
        );
        assert_eq!(edit.apply("The quick fox"), "The quick brown fox");
    }

    #[test]
    fn test_equal_strings() {
        assert!(minimal_edit("same", "same").is_none());
        assert!(minimal_edit("", "").is_none());
    }

    #[test]
    fn test_delete_span() {
        let edit = minimal_edit("hello cruel world", "hello world").unwrap();
        assert_eq!(edit.delete, 6);
        assert!(edit.insert.is_empty());
        assert_eq!(edit.apply("hello cruel world"), "hello world");
    }

    #[test]
    fn test_replace_middle() {
        let edit = minimal_edit("color: red;", "color: blue;").unwrap();
        assert_eq!(edit.offset, 7);
        assert_eq!(edit.delete, 3);
        assert_eq!(edit.insert, "blue");
    }

    #[test]
    fn test_from_and_to_empty() {
        let edit = minimal_edit("", "abc").unwrap();
        assert_eq!((edit.offset, edit.delete, edit.insert.as_str()), (0, 0, "abc"));

        let edit = minimal_edit("abc", "").unwrap();
        assert_eq!((edit.offset, edit.delete, edit.insert.as_str()), (0, 3, ""));
    }

    #[test]
    fn test_repeated_characters_do_not_overlap() {
        let edit = minimal_edit("aaa", "aaaa").unwrap();
        assert_eq!(edit.delete, 0);
        assert_eq!(edit.insert, "a");
        assert_eq!(edit.apply("aaa"), "aaaa");

        let edit = minimal_edit("abab", "ab").unwrap();
        assert_eq!(edit.apply("abab"), "ab");
    }

    #[test]
    fn test_offsets_count_chars_not_bytes() {
        let edit = minimal_edit("héllo wörld", "héllo, wörld").unwrap();
        assert_eq!(edit.offset, 5);
        assert_eq!(edit.insert, ",");
        assert_eq!(edit.apply("héllo wörld"), "héllo, wörld");
    }
}
