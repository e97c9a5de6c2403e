//! Include/exclude path patterns

use crate::config::{PathPatternConfig, PatternKind};
use crate::ConfigError;
use regex::Regex;

/// A compiled path pattern
///
/// * `Prefix` matches paths starting with the pattern.
/// * `Glob` matches the whole path, with `*` spanning any characters
///   (including `/`), `?` one character, and `[...]` / `[!...]` classes.
/// * `Regex` matches when the expression matches at the start of the path.
#[derive(Debug, Clone)]
pub enum PathPattern {
    Prefix(String),
    Glob(Regex),
    Regex(Regex),
}

impl PathPattern {
    pub fn compile(config: &PathPatternConfig) -> Result<Self, ConfigError> {
        match config.kind {
            PatternKind::Prefix => Ok(Self::Prefix(config.pattern.clone())),
            PatternKind::Glob => Regex::new(&glob_to_regex(&config.pattern))
                .map(Self::Glob)
                .map_err(|e| {
                    ConfigError::InvalidPattern(format!(
                        "Invalid glob '{}': {}",
                        config.pattern, e
                    ))
                }),
            PatternKind::Regex => Regex::new(&format!("^(?:{})", config.pattern))
                .map(Self::Regex)
                .map_err(|e| {
                    ConfigError::InvalidPattern(format!(
                        "Invalid regex '{}': {}",
                        config.pattern, e
                    ))
                }),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Prefix(prefix) => path.starts_with(prefix.as_str()),
            Self::Glob(re) | Self::Regex(re) => re.is_match(path),
        }
    }
}

/// Translates a shell glob into an anchored regular expression
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');

    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => match class_end(&chars, i) {
                Some(end) => {
                    out.push('[');
                    let mut j = i + 1;
                    if chars[j] == '!' {
                        out.push('^');
                        j += 1;
                    }
                    for &c in &chars[j..end] {
                        if matches!(c, '\\' | '[' | ']' | '^') {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push(']');
                    i = end;
                }
                // An unterminated class is a literal bracket
                None => out.push_str("\\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// Index of the `]` closing the class that opens at `start`
fn class_end(chars: &[char], start: usize) -> Option<usize> {
    let mut j = start + 1;
    if chars.get(j) == Some(&'!') {
        j += 1;
    }
    // A `]` right after the opening is part of the class
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    (j..chars.len()).find(|&k| chars[k] == ']')
}
