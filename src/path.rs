//! Hierarchical, keyed addresses of configuration subtrees.
//!
//! A [`NodePath`] is written as `/vrfs/vrf[CUSTOMER_A]/protocols/protocol[@BGP,default]/bgp`.
//! Key components are integers, `@`-prefixed enumerated tags, or strings;
//! strings that would otherwise be ambiguous are double-quoted. A
//! [`PathPattern`] uses the same syntax and additionally accepts `[*]`
//! to match any key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigError;

/// One component of a list key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyValue {
    Int(i64),
    Str(String),
    /// Enumerated type tag, e.g. a protocol identifier.
    Tag(String),
}

impl KeyValue {
    pub fn tag(name: impl Into<String>) -> Self {
        KeyValue::Tag(name.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyValue::Str(s) | KeyValue::Tag(s) => Some(s),
            KeyValue::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            KeyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn from_token(token: &str) -> Self {
        match token.parse::<i64>() {
            Ok(v) => KeyValue::Int(v),
            Err(_) => KeyValue::Str(token.to_string()),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Str(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Str(value)
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<u32> for KeyValue {
    fn from(value: u32) -> Self {
        KeyValue::Int(i64::from(value))
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        if c == '"' || c == '\\' {
            f.write_str("\\")?;
        }
        write!(f, "{c}")?;
    }
    f.write_str("\"")
}

/// Text that would not survive a trip through the key grammar unquoted.
fn breaks_key_grammar(s: &str) -> bool {
    s.is_empty() || s.trim() != s || s.contains(['/', '[', ']', ',', '"', '\\'])
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Tag(t) if breaks_key_grammar(t) => {
                f.write_str("@")?;
                write_quoted(f, t)
            }
            KeyValue::Tag(t) => write!(f, "@{t}"),
            KeyValue::Str(s) => {
                let needs_quotes = breaks_key_grammar(s)
                    || s.starts_with('@')
                    || s == "*"
                    || s.parse::<i64>().is_ok();
                if needs_quotes {
                    write_quoted(f, s)
                } else {
                    f.write_str(s)
                }
            }
        }
    }
}

/// Typed tuple identifying one entry of a keyed list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Vec<KeyValue>);

impl Key {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Key(values)
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    pub fn get(&self, component: usize) -> Option<&KeyValue> {
        self.0.get(component)
    }
}

impl From<KeyValue> for Key {
    fn from(value: KeyValue) -> Self {
        Key(vec![value])
    }
}

impl From<Vec<KeyValue>> for Key {
    fn from(values: Vec<KeyValue>) -> Self {
        Key(values)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key(vec![value.into()])
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key(vec![value.into()])
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key(vec![value.into()])
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key(vec![value.into()])
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathSegment {
    pub name: String,
    pub key: Option<Key>,
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(key) = &self.key {
            write!(f, "[{key}]")?;
        }
        Ok(())
    }
}

/// Address of one subtree instance.
///
/// Ordering is segment-wise, so a parent always sorts before its
/// descendants and a sorted set of paths is a pre-order walk of the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodePath {
    segments: Vec<PathSegment>,
}

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Appends an unkeyed segment.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment {
            name: name.into(),
            key: None,
        });
        Self { segments }
    }

    /// Appends a keyed list-entry segment.
    pub fn entry(&self, name: impl Into<String>, key: impl Into<Key>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment {
            name: name.into(),
            key: Some(key.into()),
        });
        Self { segments }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    pub fn parent(&self) -> Option<NodePath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// True when `self` is a strict prefix of `other`.
    pub fn is_ancestor_of(&self, other: &NodePath) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Strict ancestors, nearest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = NodePath> + '_ {
        (0..self.segments.len()).rev().map(|len| NodePath {
            segments: self.segments[..len].to_vec(),
        })
    }

    /// The prefix of `self` ending at the last segment named `name`
    /// (which may be `self`).
    pub fn up_to(&self, name: &str) -> Option<NodePath> {
        let idx = self.segments.iter().rposition(|s| s.name == name)?;
        Some(NodePath {
            segments: self.segments[..=idx].to_vec(),
        })
    }

    /// Key of the last segment named `name`.
    pub fn key_of(&self, name: &str) -> Option<&Key> {
        self.segments
            .iter()
            .rev()
            .find(|s| s.name == name)
            .and_then(|s| s.key.as_ref())
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for NodePath {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = parse_segments(s)?
            .into_iter()
            .map(|raw| match raw.key {
                None => Ok(PathSegment {
                    name: raw.name,
                    key: None,
                }),
                Some(RawKey::Values(values)) => Ok(PathSegment {
                    name: raw.name,
                    key: Some(Key(values)),
                }),
                Some(RawKey::Any) => Err(invalid(s, "wildcard key in a concrete path")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(NodePath { segments })
    }
}

impl Serialize for NodePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Key constraint of one pattern segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPattern {
    /// The segment is not a list entry.
    None,
    /// Any key (`[*]`).
    Any,
    Exact(Key),
}

impl KeyPattern {
    fn accepts(&self, key: Option<&Key>) -> bool {
        match (self, key) {
            (KeyPattern::None, None) => true,
            (KeyPattern::Any, Some(_)) => true,
            (KeyPattern::Exact(expected), Some(key)) => expected == key,
            _ => false,
        }
    }

    fn overlaps(&self, other: &KeyPattern) -> bool {
        match (self, other) {
            (KeyPattern::None, KeyPattern::None) => true,
            (KeyPattern::None, _) | (_, KeyPattern::None) => false,
            (KeyPattern::Exact(a), KeyPattern::Exact(b)) => a == b,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternSegment {
    pub name: String,
    pub key: KeyPattern,
}

/// Path with optional wildcard keys, used to bind handlers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    segments: Vec<PatternSegment>,
}

impl PathPattern {
    pub fn segments(&self) -> &[PatternSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&PatternSegment> {
        self.segments.last()
    }

    pub fn matches(&self, path: &NodePath) -> bool {
        self.segments.len() == path.segments.len() && self.matches_prefix(path)
    }

    fn matches_prefix(&self, path: &NodePath) -> bool {
        self.segments
            .iter()
            .zip(path.segments.iter())
            .all(|(pattern, segment)| {
                pattern.name == segment.name && pattern.key.accepts(segment.key.as_ref())
            })
    }

    /// True when the pattern addresses direct children of `parent`.
    pub fn is_child_of(&self, parent: &NodePath) -> bool {
        self.segments.len() == parent.segments.len() + 1 && self.matches_prefix(parent)
    }

    /// Number of segments pinned to an exact key; higher is more specific.
    pub fn specificity(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s.key, KeyPattern::Exact(_)))
            .count()
    }

    /// True when some path matched by `other` lies strictly beneath some
    /// path matched by `self`.
    pub fn may_contain(&self, other: &PathPattern) -> bool {
        self.segments.len() < other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a.name == b.name && a.key.overlaps(&b.key))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment.name)?;
            match &segment.key {
                KeyPattern::None => {}
                KeyPattern::Any => f.write_str("[*]")?,
                KeyPattern::Exact(key) => write!(f, "[{key}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for PathPattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = parse_segments(s)?
            .into_iter()
            .map(|raw| PatternSegment {
                name: raw.name,
                key: match raw.key {
                    None => KeyPattern::None,
                    Some(RawKey::Any) => KeyPattern::Any,
                    Some(RawKey::Values(values)) => KeyPattern::Exact(Key(values)),
                },
            })
            .collect();
        Ok(PathPattern { segments })
    }
}

enum RawKey {
    Any,
    Values(Vec<KeyValue>),
}

struct RawSegment {
    name: String,
    key: Option<RawKey>,
}

fn invalid(path: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_segments(text: &str) -> Result<Vec<RawSegment>, ConfigError> {
    let mut chars = text.chars().peekable();
    if chars.next() != Some('/') {
        return Err(invalid(text, "must start with '/'"));
    }
    let mut segments = Vec::new();
    if chars.peek().is_none() {
        return Ok(segments);
    }

    loop {
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c == '/' || c == '[' {
                break;
            }
            if c == ']' || c == ',' || c == '"' {
                return Err(invalid(text, "unexpected character in segment name"));
            }
            name.push(c);
            chars.next();
        }
        if name.is_empty() {
            return Err(invalid(text, "empty segment name"));
        }

        let key = if chars.peek() == Some(&'[') {
            chars.next();
            Some(parse_key(text, &mut chars)?)
        } else {
            None
        };
        segments.push(RawSegment { name, key });

        match chars.next() {
            None => return Ok(segments),
            Some('/') => continue,
            Some(_) => return Err(invalid(text, "expected '/' after key")),
        }
    }
}

fn parse_key(
    text: &str,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Result<RawKey, ConfigError> {
    let mut values = Vec::new();
    let mut wildcard = false;
    loop {
        let tagged = chars.next_if_eq(&'@').is_some();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('\\') => match chars.next() {
                        Some(c) => value.push(c),
                        None => return Err(invalid(text, "dangling escape")),
                    },
                    Some('"') => break,
                    Some(c) => value.push(c),
                    None => return Err(invalid(text, "unterminated quoted key")),
                }
            }
            values.push(if tagged {
                KeyValue::Tag(value)
            } else {
                KeyValue::Str(value)
            });
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c == ',' || c == ']' {
                    break;
                }
                if c == '/' || c == '[' || c == '"' {
                    return Err(invalid(text, "unexpected character in key"));
                }
                token.push(c);
                chars.next();
            }
            if tagged {
                values.push(KeyValue::Tag(token));
            } else if token.is_empty() {
                return Err(invalid(text, "empty key component"));
            } else if token == "*" {
                wildcard = true;
            } else {
                values.push(KeyValue::from_token(&token));
            }
        }

        match chars.next() {
            Some(',') => continue,
            Some(']') => break,
            _ => return Err(invalid(text, "unterminated key")),
        }
    }

    if wildcard {
        if !values.is_empty() {
            return Err(invalid(text, "'*' must be the whole key"));
        }
        return Ok(RawKey::Any);
    }
    Ok(RawKey::Values(values))
}
