//! Typename matching for listings.
//!
//! Two syntaxes are supported:
//!
//! - glob (the default): `*` matches any run of characters, `?` one
//!   character, `[...]` a character class (`[!...]` negates it), `\` escapes
//!   the next character. The whole typename must match.
//! - regex: the pattern is a regular expression matched anywhere in the
//!   typename, so anchors are up to the caller.

use regex::Regex;

use crate::error::{MetaError, MetaResult};

/// A compiled typename pattern.
#[derive(Clone, Debug)]
pub struct TypenamePattern {
    source: String,
    regex: Regex,
}

impl TypenamePattern {
    /// Compile `pattern` as a regex when `regex` is set, as a glob otherwise.
    pub fn compile(pattern: &str, regex: bool) -> MetaResult<Self> {
        if regex {
            Self::regex(pattern)
        } else {
            Self::glob(pattern)
        }
    }

    pub fn glob(pattern: &str) -> MetaResult<Self> {
        let translated = glob_to_regex(pattern)?;
        Self::build(pattern, &translated)
    }

    pub fn regex(pattern: &str) -> MetaResult<Self> {
        Self::build(pattern, pattern)
    }

    fn build(source: &str, expr: &str) -> MetaResult<Self> {
        let regex = Regex::new(expr).map_err(|e| MetaError::InvalidPattern {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn matches(&self, typename: &str) -> bool {
        self.regex.is_match(typename)
    }

    /// The pattern as the caller wrote it.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn glob_to_regex(glob: &str) -> MetaResult<String> {
    let invalid = |reason: &str| MetaError::InvalidPattern {
        pattern: glob.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '\\' => {
                let escaped = chars.next().ok_or_else(|| invalid("trailing escape"))?;
                out.push_str(&regex::escape(&escaped.to_string()));
            }
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    chars.next();
                    out.push('^');
                }
                let mut first = true;
                loop {
                    let c = chars.next().ok_or_else(|| invalid("unterminated character class"))?;
                    match c {
                        ']' if !first => break,
                        '\\' | '[' | ']' | '&' | '~' | '^' => {
                            out.push('\\');
                            out.push(c);
                        }
                        _ => out.push(c),
                    }
                    first = false;
                }
                out.push(']');
            }
            _ => out.push_str(&regex::escape(&ch.to_string())),
        }
    }
    out.push('$');
    Ok(out)
}
