//! ICD10 code ranges (`A00-A09`).

use std::cmp::Ordering;

/// An inclusive range of three-character ICD10 categories, identified by
/// its `START-END` text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRange {
    pub id: String,
    start: (String, u32),
    end: (String, u32),
}

impl CodeRange {
    /// Parses `A00-A09`. A single code (`U07`) is a one-element range.
    pub fn parse(id: &str) -> Option<Self> {
        let (start, end) = match id.split_once('-') {
            Some((start, end)) => (start.trim(), end.trim()),
            None => (id.trim(), id.trim()),
        };
        let start = split_code(start)?;
        let end = split_code(end)?;
        if compare(&start, &end) == Ordering::Greater {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            start,
            end,
        })
    }

    /// Builds the id of a range from its bounds.
    pub fn id_from_bounds(start: &str, end: &str) -> String {
        format!("{}-{}", start.trim(), end.trim())
    }

    /// Whether the category of `code` (`A01.2` -> `A01`) falls in the range.
    pub fn contains(&self, code: &str) -> bool {
        let stem = code.split('.').next().unwrap_or(code);
        match split_code(stem) {
            Some(key) => {
                compare(&self.start, &key) != Ordering::Greater
                    && compare(&key, &self.end) != Ordering::Greater
            }
            None => false,
        }
    }

    /// Number of categories spanned when both ends share a prefix.
    fn span(&self) -> u32 {
        if self.start.0 == self.end.0 {
            self.end.1 - self.start.1
        } else {
            u32::MAX
        }
    }

    /// Picks the narrowest range containing `code`.
    pub fn narrowest<'a>(ranges: &'a [CodeRange], code: &str) -> Option<&'a CodeRange> {
        ranges
            .iter()
            .filter(|r| r.contains(code))
            .min_by(|a, b| a.span().cmp(&b.span()).then_with(|| a.id.cmp(&b.id)))
    }
}

/// `A09` -> `("A", 9)`. Letters first, then digits, nothing else.
fn split_code(code: &str) -> Option<(String, u32)> {
    let digits_at = code.find(|c: char| c.is_ascii_digit())?;
    let (prefix, digits) = code.split_at(digits_at);
    if prefix.is_empty()
        || !prefix.chars().all(|c| c.is_ascii_alphabetic())
        || !digits.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    Some((prefix.to_ascii_uppercase(), digits.parse().ok()?))
}

fn compare(a: &(String, u32), b: &(String, u32)) -> Ordering {
    a.0.cmp(&b.0).then(a.1.cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_codes_and_subcodes() {
        let range = CodeRange::parse("A00-A09").unwrap();
        assert!(range.contains("A00"));
        assert!(range.contains("A09"));
        assert!(range.contains("A01.2"));
        assert!(!range.contains("A10"));
        assert!(!range.contains("B00"));
    }

    #[test]
    fn test_range_across_letters() {
        let range = CodeRange::parse("V01-X59").unwrap();
        assert!(range.contains("W19"));
        assert!(!range.contains("Y01"));
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(CodeRange::parse("A09-A00").is_none());
        assert!(CodeRange::parse("01").is_none());
        assert!(CodeRange::parse("HP:0000118").is_none());
    }

    #[test]
    fn test_narrowest_range_wins() {
        let ranges = vec![
            CodeRange::parse("C00-C97").unwrap(),
            CodeRange::parse("C00-C14").unwrap(),
        ];
        assert_eq!(CodeRange::narrowest(&ranges, "C01").unwrap().id, "C00-C14");
        assert_eq!(CodeRange::narrowest(&ranges, "C50.9").unwrap().id, "C00-C97");
        assert!(CodeRange::narrowest(&ranges, "D00").is_none());
    }
}
