//! Rules that derive parent candidates from a record.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::parser::Record;

const RANGE_PREFIX: &str = "range:";

/// How to find the parent of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParentRule {
    /// The node is a root.
    Root,
    /// The parent id is stored in a field of the record.
    Column { field: String },
    /// Strip the last `separator`-delimited segment (`A00.1` -> `A00`).
    Truncate { separator: char },
    /// The ICD10 group whose range holds the code's category.
    GroupRange,
    /// Every candidate of every rule, in order; the first that resolves wins.
    FirstOf { rules: Vec<ParentRule> },
}

impl ParentRule {
    pub fn column(field: &str) -> Self {
        ParentRule::Column {
            field: field.to_string(),
        }
    }

    /// Parent candidates for node `id`, most preferred first.
    ///
    /// Empty values and self references yield nothing.
    pub fn candidates(&self, id: &str, record: &Record) -> Vec<ParentRef> {
        let mut out = Vec::new();
        self.collect(id, record, &mut out);
        out
    }

    fn collect(&self, id: &str, record: &Record, out: &mut Vec<ParentRef>) {
        let candidate = match self {
            ParentRule::Root => None,
            ParentRule::Column { field } => record
                .get(field)
                .map(|value| ParentRef::Code(value.to_string())),
            ParentRule::Truncate { separator } => id
                .rfind(*separator)
                .map(|pos| &id[..pos])
                .filter(|parent| !parent.is_empty())
                .map(|parent| ParentRef::Code(parent.to_string())),
            ParentRule::GroupRange => Some(ParentRef::Range(id.to_string())),
            ParentRule::FirstOf { rules } => {
                for rule in rules {
                    rule.collect(id, record, out);
                }
                None
            }
        };

        if let Some(candidate) = candidate {
            let is_self = matches!(&candidate, ParentRef::Code(code) if code == id);
            if !is_self && !out.contains(&candidate) {
                out.push(candidate);
            }
        }
    }
}

/// One parent candidate as persisted in `parent_refs`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParentRef {
    /// A node id (`A00`, `A00-A09`, `HP:0000118`).
    Code(String),
    /// The group containing this code (stored as `range:A01.2`).
    Range(String),
}

impl ParentRef {
    pub fn parse(text: &str) -> Self {
        match text.strip_prefix(RANGE_PREFIX) {
            Some(code) => ParentRef::Range(code.to_string()),
            None => ParentRef::Code(text.to_string()),
        }
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentRef::Code(code) => f.write_str(code),
            ParentRef::Range(code) => write!(f, "{}{}", RANGE_PREFIX, code),
        }
    }
}

/// The `[hierarchy]` configuration section: one rule per import kind.
///
/// ICD10 codes also get a chapter link, resolved separately from their
/// block or category parent. Set `icd10_code_chapters` to `root` to drop it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyRules {
    pub icd10_chapters: ParentRule,
    pub icd10_groups: ParentRule,
    pub icd10_codes: ParentRule,
    pub icd10_code_chapters: ParentRule,
    pub hpo: ParentRule,
}

impl Default for HierarchyRules {
    fn default() -> Self {
        Self {
            icd10_chapters: ParentRule::Root,
            icd10_groups: ParentRule::column("chapter"),
            icd10_codes: ParentRule::FirstOf {
                rules: vec![ParentRule::Truncate { separator: '.' }, ParentRule::GroupRange],
            },
            icd10_code_chapters: ParentRule::column("chapter"),
            hpo: ParentRule::column("parent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        Record::new(
            1,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn test_truncate_then_group_range() {
        let rule = HierarchyRules::default().icd10_codes;

        assert_eq!(
            rule.candidates("A00.1", &record(&[])),
            vec![
                ParentRef::Code("A00".to_string()),
                ParentRef::Range("A00.1".to_string())
            ]
        );
        assert_eq!(
            rule.candidates("A00", &record(&[])),
            vec![ParentRef::Range("A00".to_string())]
        );
    }

    #[test]
    fn test_column_rule_ignores_empty_and_self() {
        let rule = ParentRule::column("parent");
        assert!(rule
            .candidates("HP:0000001", &record(&[("parent", "")]))
            .is_empty());
        assert!(rule
            .candidates("HP:0000001", &record(&[("parent", "HP:0000001")]))
            .is_empty());
        assert_eq!(
            rule.candidates("A00", &record(&[("parent", "A00-A09")])),
            vec![ParentRef::Code("A00-A09".to_string())]
        );
    }

    #[test]
    fn test_parent_ref_text_form() {
        let range = ParentRef::Range("A01.2".to_string());
        assert_eq!(range.to_string(), "range:A01.2");
        assert_eq!(ParentRef::parse("range:A01.2"), range);
        assert_eq!(
            ParentRef::parse("A00"),
            ParentRef::Code("A00".to_string())
        );
    }

    #[test]
    fn test_rules_deserialize_from_config() {
        let rules: HierarchyRules = serde_json::from_value(serde_json::json!({
            "icd10_codes": {"type": "first_of", "rules": [
                {"type": "column", "field": "parent"},
                {"type": "group_range"}
            ]}
        }))
        .unwrap();
        assert_eq!(rules.hpo, ParentRule::column("parent"));
        assert_eq!(rules.icd10_code_chapters, ParentRule::column("chapter"));
        assert!(matches!(rules.icd10_codes, ParentRule::FirstOf { ref rules } if rules.len() == 2));
    }
}
