//! Glob patterns for repository names and tags
//!
//! Supported syntax:
//! - `*` matches any run of characters inside one path segment
//! - `**` matches across segments; `**/` also matches zero segments
//! - `?` matches one character other than `/`
//! - `[abc]`, `[a-z]`, `[!abc]` character classes
//! - `{a,b}` alternatives
//! - `\x` matches `x` literally

use regex::Regex;

use crate::error::{ReplicationError, Result};

#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let translated = translate(pattern)?;
        let regex = Regex::new(&translated)?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True when the pattern contains no wildcard and matches exactly one value
    pub fn is_literal(&self) -> bool {
        !self
            .source
            .chars()
            .any(|c| matches!(c, '*' | '?' | '[' | '{' | '\\'))
    }
}

/// One-shot helper for callers that match a single value
pub fn matches(pattern: &str, value: &str) -> Result<bool> {
    Ok(Pattern::new(pattern)?.matches(value))
}

fn translate(pattern: &str) -> Result<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    let mut brace_depth = 0usize;
    let mut i = 0;

    out.push('^');
    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    if chars.get(i + 2) == Some(&'/') {
                        out.push_str("(?:.*/)?");
                        i += 3;
                    } else {
                        out.push_str(".*");
                        i += 2;
                    }
                    continue;
                }
                out.push_str("[^/]*");
            }
            '?' => out.push_str("[^/]"),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.push('[');
                    let mut j = i + 1;
                    if matches!(chars.get(j), Some('!') | Some('^')) {
                        out.push('^');
                        j += 1;
                    }
                    while j < end {
                        let ch = chars[j];
                        if matches!(ch, '\\' | '[' | ']' | '^' | '&' | '~') {
                            out.push('\\');
                        }
                        out.push(ch);
                        j += 1;
                    }
                    out.push(']');
                    i = end;
                }
                None => out.push_str(&regex::escape("[")),
            },
            '{' => {
                brace_depth += 1;
                out.push_str("(?:");
            }
            '}' if brace_depth > 0 => {
                brace_depth -= 1;
                out.push(')');
            }
            ',' if brace_depth > 0 => out.push('|'),
            '\\' => {
                i += 1;
                match chars.get(i) {
                    Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                    None => {
                        return Err(ReplicationError::Configuration(format!(
                            "invalid pattern {}: trailing escape",
                            pattern
                        )));
                    }
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
        i += 1;
    }

    if brace_depth > 0 {
        return Err(ReplicationError::Configuration(format!(
            "invalid pattern {}: unclosed brace",
            pattern
        )));
    }
    out.push('$');
    Ok(out)
}

/// Index of the `]` closing the class opened at `start`, if any
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if matches!(chars.get(j), Some('!') | Some('^')) {
        j += 1;
    }
    // a leading ']' is part of the class
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    while j < chars.len() {
        if chars[j] == ']' {
            return Some(j);
        }
        j += 1;
    }
    None
}
