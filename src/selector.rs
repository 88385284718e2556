//! Compiled glob selectors over DNS names.
//!
//! A selector holds the pattern set of one chaos rule. Matching is
//! case-insensitive (ASCII fold, per DNS convention) and insensitive to the
//! trailing dot of a canonical query name, so `"foo.bar"` matches both
//! `foo.bar` and `foo.bar.`. A `*` matches any run of characters and may span
//! label boundaries.

use thiserror::Error;

/// Why a pattern failed to compile.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// The pattern string was empty.
    #[error("empty pattern")]
    Empty,
}

/// A compiled set of DNS-name patterns.
///
/// An empty set matches every name.
#[derive(Debug, Clone)]
pub struct Selector {
    patterns: Vec<String>,
}

impl Selector {
    /// Compile a pattern set. Fails on the first malformed pattern; callers
    /// reject the whole rule in that case.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Selector, PatternError> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if pattern.is_empty() {
                return Err(PatternError::Empty);
            }
            compiled.push(canonical(pattern));
        }
        Ok(Selector { patterns: compiled })
    }

    /// Check whether a queried name matches any pattern in the set.
    pub fn matches(&self, name: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let name = canonical(name);
        self.patterns
            .iter()
            .any(|pattern| glob_match(pattern.as_bytes(), name.as_bytes()))
    }
}

/// Lowercase and strip at most one trailing dot.
fn canonical(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase()
}

/// Iterative wildcard match; `*` matches any (possibly empty) run of bytes.
fn glob_match(pattern: &[u8], input: &[u8]) -> bool {
    let mut p = 0;
    let mut i = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while i < input.len() {
        if p < pattern.len() && (pattern[p] == b'*' || pattern[p] == input[i]) {
            if pattern[p] == b'*' {
                star = Some(p);
                mark = i;
                p += 1;
            } else {
                p += 1;
                i += 1;
            }
        } else if let Some(s) = star {
            // Backtrack: let the last `*` consume one more input byte.
            p = s + 1;
            mark += 1;
            i = mark;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}
