//! Glob patterns used by rule resources and `matches` conditions.
//!
//! `*` matches any run of characters (including `/`), `?` matches exactly one
//! character, everything else is literal, and the whole subject must match.
//! Patterns compile to a size-limited [`regex::Regex`], so matching is linear
//! in the subject length.

use std::fmt;

use regex::{Regex, RegexBuilder};

use super::error::{PolicyError, PolicyResult};

/// Longest glob accepted, in bytes.
pub const MAX_PATTERN_LEN: usize = 512;

const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A compiled, anchored glob.
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn compile(glob: &str) -> PolicyResult<Self> {
        if glob.len() > MAX_PATTERN_LEN {
            return Err(PolicyError::PatternTooLong {
                len: glob.len(),
                max: MAX_PATTERN_LEN,
            });
        }

        let regex = RegexBuilder::new(&glob_to_regex(glob))
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
            .map_err(|e| PolicyError::InvalidPattern {
                pattern: glob.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            source: glob.to_string(),
            regex,
        })
    }

    pub fn is_match(&self, subject: &str) -> bool {
        self.regex.is_match(subject)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True for a pattern that matches every subject.
    pub fn is_wildcard(&self) -> bool {
        !self.source.is_empty() && self.source.chars().all(|c| c == '*')
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.source).finish()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

fn glob_to_regex(glob: &str) -> String {
    // (?s) lets `.` cross newlines in multi-line script bodies.
    let mut out = String::with_capacity(glob.len() * 2 + 8);
    out.push_str("(?s)^");
    let mut prev_star = false;
    for ch in glob.chars() {
        match ch {
            '*' => {
                if !prev_star {
                    out.push_str(".*");
                }
                prev_star = true;
                continue;
            }
            '?' => out.push('.'),
            other => {
                let mut buf = [0u8; 4];
                out.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
        prev_star = false;
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(glob: &str, subject: &str) -> bool {
        Pattern::compile(glob).unwrap().is_match(subject)
    }

    #[test]
    fn test_star_crosses_separators() {
        assert!(m("/etc/*", "/etc/passwd"));
        assert!(m("/etc/*", "/etc/sub/file"));
        assert!(!m("/etc/*", "/etcetera"));
    }

    #[test]
    fn test_match_is_anchored() {
        assert!(m("rm -rf /*", "rm -rf /tmp"));
        assert!(m("rm -rf /*", "rm -rf /anything"));
        assert!(!m("rm -rf /*", "rm -rf tmp"));
        assert!(!m("rm -rf /*", "sudo rm -rf /tmp"));
        assert!(!m("ls", "ls -la"));
    }

    #[test]
    fn test_question_mark_is_single_char() {
        assert!(m("file?.txt", "file1.txt"));
        assert!(!m("file?.txt", "file12.txt"));
        assert!(!m("file?.txt", "file.txt"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        assert!(m("a.b", "a.b"));
        assert!(!m("a.b", "axb"));
        assert!(m("curl * | sh", "curl http://x | sh"));
        assert!(m(":(){ :|:& };:", ":(){ :|:& };:"));
        assert!(m("[x]+", "[x]+"));
    }

    #[test]
    fn test_star_spans_newlines() {
        assert!(m("echo*", "echo one\necho two"));
    }

    #[test]
    fn test_empty_pattern_matches_only_empty() {
        assert!(m("", ""));
        assert!(!m("", "x"));
    }

    #[test]
    fn test_oversized_pattern_rejected() {
        let long = "a".repeat(MAX_PATTERN_LEN + 1);
        assert!(matches!(
            Pattern::compile(&long),
            Err(PolicyError::PatternTooLong { .. })
        ));
        assert!(Pattern::compile(&"a".repeat(MAX_PATTERN_LEN)).is_ok());
    }

    #[test]
    fn test_pathological_stars_stay_linear() {
        let p = Pattern::compile(&"*a".repeat(100)).unwrap();
        let subject = "a".repeat(99) + "b";
        assert!(!p.is_match(&subject));
    }

    #[test]
    fn test_wildcard_detection() {
        assert!(Pattern::compile("*").unwrap().is_wildcard());
        assert!(Pattern::compile("**").unwrap().is_wildcard());
        assert!(!Pattern::compile("/tmp/*").unwrap().is_wildcard());
    }
}
