//! Ref name filtering

use regex_lite::Regex;

use super::Ref;

/// Selects which refs get published.
///
/// Without a pattern every ref passes. With one, a ref passes when the
/// pattern matches anywhere in its full name; anchor with `^...$` for an
/// exact match.
#[derive(Debug, Clone, Default)]
pub struct RefFilter {
    pattern: Option<Regex>,
}

impl RefFilter {
    /// Filter that accepts everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Compile a filter from an optional pattern.
    pub fn new(pattern: Option<&str>) -> Result<Self, regex_lite::Error> {
        let pattern = pattern.map(Regex::new).transpose()?;
        Ok(Self { pattern })
    }

    /// Source text of the pattern, if any.
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_ref().map(Regex::as_str)
    }

    /// Whether `r` should be processed.
    pub fn accepts(&self, r: &Ref) -> bool {
        self.pattern.as_ref().map_or(true, |p| p.is_match(&r.name))
    }

    /// Keep only accepted refs.
    pub fn apply(&self, refs: Vec<Ref>) -> Vec<Ref> {
        refs.into_iter().filter(|r| self.accepts(r)).collect()
    }
}
