//! Key Paths
//!
//! A KeyPath identifies an attribute across a chain of nested models, such
//! as `address.name` or `items.0.label`. Change notifications carry the
//! path of the attribute that changed; as nested models re-emit events on
//! their parents, the parent prepends its own attribute name, building
//! arbitrarily deep paths without string concatenation.
//!
//! # Syntax
//!
//! Paths parse from the dotted textual form. A segment that consists only
//! of ASCII digits is an index; everything else is a key. Bracket indices
//! (`items[0].label`) are accepted as an alternative spelling. Display
//! always uses the dotted form.

use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;
use thiserror::Error;

/// One step of a key path: either a named attribute or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A named attribute or map key.
    Key(String),

    /// A position in a list-valued attribute.
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => f.write_str(key),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Error produced when a textual path cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyPathError {
    #[error("empty path segment")]
    EmptySegment,

    #[error("unterminated index bracket")]
    UnterminatedIndex,

    #[error("invalid index {0:?}")]
    InvalidIndex(String),

    #[error("unexpected character {0:?} after index")]
    UnexpectedCharacter(char),
}

/// An ordered sequence of [`Segment`]s identifying a nested attribute.
///
/// Most paths are shallow, so segments are stored inline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyPath {
    segments: SmallVec<[Segment; 4]>,
}

impl KeyPath {
    /// The empty path, denoting the model itself.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-key path for a direct attribute.
    pub fn from_key(key: impl Into<String>) -> Self {
        let mut segments = SmallVec::new();
        segments.push(Segment::Key(key.into()));
        Self { segments }
    }

    /// The segments of this path, in order.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a segment in place.
    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// A new path with `key` prepended.
    ///
    /// Used when a parent re-emits a nested change under its own attribute
    /// name.
    pub fn prefixed(&self, key: &str) -> KeyPath {
        let mut segments = SmallVec::with_capacity(self.segments.len() + 1);
        segments.push(Segment::Key(key.to_owned()));
        segments.extend(self.segments.iter().cloned());
        Self { segments }
    }

    /// True if `prefix` is a leading subsequence of this path.
    pub fn starts_with(&self, prefix: &KeyPath) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Split off the final segment, if any.
    pub fn split_last(&self) -> Option<(&Segment, &[Segment])> {
        self.segments.split_last()
    }
}

impl FromIterator<Segment> for KeyPath {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for KeyPath {
    type Err = KeyPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments: SmallVec<[Segment; 4]> = SmallVec::new();
        if s.is_empty() {
            return Ok(Self { segments });
        }

        let mut buf = String::new();
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if buf.is_empty() {
                        return Err(KeyPathError::EmptySegment);
                    }
                    segments.push(text_segment(&buf));
                    buf.clear();
                    if chars.peek().is_none() {
                        return Err(KeyPathError::EmptySegment);
                    }
                }
                '[' => {
                    if !buf.is_empty() {
                        segments.push(text_segment(&buf));
                        buf.clear();
                    }
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            Some(d) => {
                                digits.push(d);
                                return Err(KeyPathError::InvalidIndex(digits));
                            }
                            None => return Err(KeyPathError::UnterminatedIndex),
                        }
                    }
                    let index = digits
                        .parse::<usize>()
                        .map_err(|_| KeyPathError::InvalidIndex(digits))?;
                    segments.push(Segment::Index(index));

                    // A bracket must be followed by a separator, another
                    // bracket, or the end of the path.
                    match chars.peek() {
                        Some('.') => {
                            chars.next();
                            if chars.peek().is_none() {
                                return Err(KeyPathError::EmptySegment);
                            }
                        }
                        Some('[') | None => {}
                        Some(&other) => return Err(KeyPathError::UnexpectedCharacter(other)),
                    }
                }
                ']' => return Err(KeyPathError::UnexpectedCharacter(']')),
                _ => buf.push(c),
            }
        }
        if !buf.is_empty() {
            segments.push(text_segment(&buf));
        }
        Ok(Self { segments })
    }
}

/// Classify a dotted segment: all-digit text is an index.
fn text_segment(text: &str) -> Segment {
    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        match text.parse::<usize>() {
            Ok(index) => Segment::Index(index),
            Err(_) => Segment::Key(text.to_owned()),
        }
    } else {
        Segment::Key(text.to_owned())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
