//! Ignore-list and restriction matching.
//!
//! Order matters: literal prefixes are checked before regexes, and a root's
//! restriction is checked last and only applies to files, not directories.

use regex::Regex;

/// Case-insensitive prefix match bounded by the ignore entry's own length,
/// not the candidate path's. `/etc` ignores `/etc/passwd` but not
/// `/etcetera`, because `strncasecmp(ignore, path, strlen(ignore))` only
/// ever reads as many bytes as the ignore entry has.
fn matches_literal_prefix(ignore: &str, path: &str) -> bool {
    let ignore_len = ignore.len();
    if path.len() < ignore_len {
        return false;
    }
    path[..ignore_len].eq_ignore_ascii_case(ignore)
}

pub struct IgnoreRules {
    literal: Vec<String>,
    regex: Vec<Regex>,
}

impl IgnoreRules {
    pub fn new(literal: Vec<String>, regex: Vec<Regex>) -> Self {
        IgnoreRules { literal, regex }
    }

    /// True if `path` should be skipped entirely: not stat'd beyond whatever
    /// was already needed to reach this point, not inserted into the
    /// database, and no event ever emitted for it.
    pub fn is_ignored(&self, path: &str) -> bool {
        if self
            .literal
            .iter()
            .any(|entry| matches_literal_prefix(entry, path))
        {
            return true;
        }
        self.regex.iter().any(|re| re.is_match(path))
    }
}

/// A root's restriction only gates files, never directory recursion itself.
pub fn passes_restriction(restriction: Option<&Regex>, path: &str) -> bool {
    match restriction {
        Some(re) => re.is_match(path),
        None => true,
    }
}
