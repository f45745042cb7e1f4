//! Stable identifiers derived from free-text labels.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A normalized identifier: lower-case, `[0-9a-z]` runs joined by single dashes, no
/// leading or trailing dash. Safe to use as a CSS class name suffix and as a map key.
///
/// Normalization is idempotent: `Slug::new(s.as_str()) == s` for any `Slug` `s`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Slug(String);

fn non_alphanumeric() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("[^0-9a-z]+").expect("static regex should parse"))
}

impl Slug {
    /// Canonicalize a free-text label.
    pub fn new(label: &str) -> Slug {
        let lower = label.to_lowercase();
        let dashed = non_alphanumeric().replace_all(&lower, "-");
        Slug(dashed.trim_matches('-').to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Slug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Slug {
    fn from(value: &str) -> Slug {
        Slug::new(value)
    }
}

impl From<String> for Slug {
    fn from(value: String) -> Slug {
        Slug::new(&value)
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for Slug {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

impl log::kv::ToValue for Slug {
    fn to_value(&self) -> log::kv::Value {
        log::kv::Value::from_display(self)
    }
}

#[cfg(test)]
mod tests {
    use super::Slug;

    #[test]
    fn canonicalizes_labels() {
        assert_eq!(Slug::new("Hello World").as_str(), "hello-world");
        assert_eq!(Slug::new("  Black Friday!! 2024 ").as_str(), "black-friday-2024");
        assert_eq!(Slug::new("experiment:my-test").as_str(), "experiment-my-test");
        assert_eq!(Slug::new("---").as_str(), "");
        assert_eq!(Slug::new("").as_str(), "");
    }

    #[test]
    fn is_idempotent_and_well_formed() {
        let inputs = [
            "Simple",
            "UPPER lower 42",
            "múltiple--dashes__and.dots",
            "🎉 emoji / slash",
            "-leading-and-trailing-",
        ];
        for input in inputs {
            let once = Slug::new(input);
            let twice = Slug::new(once.as_str());
            assert_eq!(once, twice, "normalize should be idempotent for {input:?}");
            assert!(
                once.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
                "unexpected character in {once:?}"
            );
            assert!(!once.starts_with('-') && !once.ends_with('-'));
            assert!(!once.contains("--"), "consecutive dashes in {once:?}");
        }
    }
}
