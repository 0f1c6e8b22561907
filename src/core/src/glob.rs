//! Glob expansion of permission keys into literal strings
//!
//! Supports brace alternation (`foo.{read,write}`, nesting allowed) and
//! character classes (`group[12]`). Patterns that fail to parse are not
//! errors at the engine level; call sites fall back to the literal
//! string.

use thiserror::Error;

/// Pattern parse failures, all of which trigger literal fallback
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GlobParseError {
    /// A `{` without a matching `}`
    #[error("Unbalanced brace at offset {0}")]
    UnbalancedBrace(usize),

    /// A `}` without a matching `{`
    #[error("Unexpected closing brace at offset {0}")]
    UnexpectedBrace(usize),

    /// A `[` without a matching `]`
    #[error("Unbalanced bracket at offset {0}")]
    UnbalancedBracket(usize),

    /// An empty character class `[]`
    #[error("Empty character class at offset {0}")]
    EmptyClass(usize),
}

/// Expand a pattern into the literal strings it enumerates
///
/// A plain string expands to itself. The result preserves the
/// left-to-right order of alternatives.
pub fn expand(pattern: &str) -> Result<Vec<String>, GlobParseError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut pos = 0;
    parse_sequence(&chars, &mut pos, false)
}

/// Parse a concatenation of literals, alternations, and classes
///
/// When `in_alternation` is set, `,` and `}` end the sequence and are
/// left for the caller to consume.
fn parse_sequence(
    chars: &[char],
    pos: &mut usize,
    in_alternation: bool,
) -> Result<Vec<String>, GlobParseError> {
    let mut results = vec![String::new()];

    while *pos < chars.len() {
        match chars[*pos] {
            ',' | '}' if in_alternation => break,
            '{' => {
                let branches = parse_alternation(chars, pos)?;
                results = cross(results, &branches);
            }
            '}' => return Err(GlobParseError::UnexpectedBrace(*pos)),
            '[' => {
                let branches = parse_class(chars, pos)?;
                results = cross(results, &branches);
            }
            c => {
                for result in &mut results {
                    result.push(c);
                }
                *pos += 1;
            }
        }
    }

    Ok(results)
}

/// Parse `{a,b,...}` starting at the opening brace
fn parse_alternation(chars: &[char], pos: &mut usize) -> Result<Vec<String>, GlobParseError> {
    let start = *pos;
    *pos += 1; // consume '{'

    let mut branches = Vec::new();
    loop {
        branches.extend(parse_sequence(chars, pos, true)?);
        match chars.get(*pos) {
            Some(',') => *pos += 1,
            Some('}') => {
                *pos += 1;
                return Ok(branches);
            }
            _ => return Err(GlobParseError::UnbalancedBrace(start)),
        }
    }
}

/// Parse `[abc]` starting at the opening bracket
fn parse_class(chars: &[char], pos: &mut usize) -> Result<Vec<String>, GlobParseError> {
    let start = *pos;
    *pos += 1; // consume '['

    let mut branches = Vec::new();
    while let Some(&c) = chars.get(*pos) {
        if c == ']' {
            *pos += 1;
            if branches.is_empty() {
                return Err(GlobParseError::EmptyClass(start));
            }
            return Ok(branches);
        }
        branches.push(c.to_string());
        *pos += 1;
    }

    Err(GlobParseError::UnbalancedBracket(start))
}

/// Cartesian concatenation of two alternative lists
fn cross(prefixes: Vec<String>, suffixes: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(prefixes.len() * suffixes.len());
    for prefix in &prefixes {
        for suffix in suffixes {
            out.push(format!("{}{}", prefix, suffix));
        }
    }
    out
}
