//! Glob Pattern Queries
//!
//! Pattern queries select keys with shell-style globs:
//!
//! - `*` matches any run of characters, including none
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]` match one character from a class; `[^a-z]` or `[!a-z]` negate it
//! - `\x` matches `x` literally
//!
//! Matching is case-sensitive and anchored at both ends. Keys are flat strings,
//! so `/` has no special meaning.
//!
//! A malformed pattern matches nothing; the scan itself still succeeds and
//! yields `[]`.

use crate::storage::{now_nanos, Entry, StorageError, StorageResult};
use bytes::Bytes;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Chars;
use tracing::debug;

/// Reasons a glob pattern cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("unterminated character class")]
    UnterminatedClass,

    #[error("empty character class")]
    EmptyClass,

    #[error("pattern ends with an escape")]
    TrailingEscape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Single(char),
    Range(char, char),
}

impl ClassItem {
    fn contains(&self, c: char) -> bool {
        match *self {
            ClassItem::Single(s) => s == c,
            ClassItem::Range(lo, hi) => lo <= c && c <= hi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(char),
    AnyChar,
    AnySeq,
    Class { negated: bool, items: Vec<ClassItem> },
}

impl Token {
    fn matches_char(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyChar => true,
            Token::AnySeq => false,
            Token::Class { negated, items } => items.iter().any(|i| i.contains(c)) != *negated,
        }
    }
}

/// A compiled glob pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    tokens: Vec<Token>,
}

impl GlobPattern {
    /// Compiles a pattern.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let mut tokens = Vec::new();
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            let token = match c {
                // Runs of stars are equivalent to one
                '*' if tokens.last() == Some(&Token::AnySeq) => continue,
                '*' => Token::AnySeq,
                '?' => Token::AnyChar,
                '\\' => Token::Literal(chars.next().ok_or(PatternError::TrailingEscape)?),
                '[' => parse_class(&mut chars)?,
                c => Token::Literal(c),
            };
            tokens.push(token);
        }

        Ok(Self { tokens })
    }

    /// Checks whether the whole of `text` matches.
    pub fn matches(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let (mut p, mut t) = (0, 0);
        // Where to resume after the most recent `*`: (token after it, text position)
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.tokens.get(p) {
                Some(Token::AnySeq) => {
                    backtrack = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                Some(token) if token.matches_char(text[t]) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }

            // Mismatch: let the last star swallow one more character
            match backtrack {
                Some((star_p, star_t)) => {
                    backtrack = Some((star_p, star_t + 1));
                    p = star_p;
                    t = star_t + 1;
                }
                None => return false,
            }
        }

        self.tokens[p..].iter().all(|token| *token == Token::AnySeq)
    }
}

fn class_char(chars: &mut Peekable<Chars<'_>>) -> Result<char, PatternError> {
    match chars.next() {
        Some('\\') => chars.next().ok_or(PatternError::UnterminatedClass),
        Some(c) => Ok(c),
        None => Err(PatternError::UnterminatedClass),
    }
}

fn parse_class(chars: &mut Peekable<Chars<'_>>) -> Result<Token, PatternError> {
    let negated = matches!(chars.peek(), Some('^') | Some('!'));
    if negated {
        chars.next();
    }

    let mut items = Vec::new();
    loop {
        if chars.peek() == Some(&']') {
            chars.next();
            if items.is_empty() {
                return Err(PatternError::EmptyClass);
            }
            return Ok(Token::Class { negated, items });
        }

        let lo = class_char(chars)?;
        if chars.peek() != Some(&'-') {
            items.push(ClassItem::Single(lo));
            continue;
        }
        chars.next();

        // `[a-]` treats the dash literally
        if chars.peek() == Some(&']') {
            items.push(ClassItem::Single(lo));
            items.push(ClassItem::Single('-'));
            continue;
        }
        let hi = class_char(chars)?;
        items.push(ClassItem::Range(lo, hi));
    }
}

/// A pattern scan in progress: the compiled glob plus the clock reading every
/// entry is checked against, so one scan has one notion of "now".
#[derive(Debug)]
pub struct PatternQuery {
    glob: Option<GlobPattern>,
    now: i64,
}

impl PatternQuery {
    /// Prepares a scan for `pattern`.
    pub fn new(pattern: &str) -> Self {
        let glob = match GlobPattern::new(pattern) {
            Ok(glob) => Some(glob),
            Err(e) => {
                debug!(pattern = %pattern, error = %e, "Malformed pattern matches nothing");
                None
            }
        };

        Self {
            glob,
            now: now_nanos(),
        }
    }

    /// Returns true if `entry` belongs in the result.
    pub fn selects(&self, entry: &Entry) -> bool {
        match &self.glob {
            Some(glob) => !entry.is_expired_at(self.now) && glob.matches(&entry.key),
            None => false,
        }
    }
}

/// Renders selected entries as `[{"<key>":"<value>"},...]`.
///
/// Values are decoded as UTF-8, with invalid sequences replaced.
pub fn render<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> StorageResult<Bytes> {
    let objects: Vec<BTreeMap<&str, Cow<'_, str>>> = entries
        .into_iter()
        .map(|entry| BTreeMap::from([(entry.key.as_str(), String::from_utf8_lossy(&entry.value))]))
        .collect();

    serde_json::to_vec(&objects)
        .map(Bytes::from)
        .map_err(StorageError::Encode)
}
