use std::fmt;

use serde::{Serialize, Serializer};

use crate::{BrokerError, Result};

pub const ANY: &str = "*";
pub const ANY_REMAINING: &str = "**";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    ///`*`, exactly one segment
    Any,
    ///trailing `**`, zero or more remaining segments
    AnyRemaining,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(s) => f.write_str(s),
            Segment::Any => f.write_str(ANY),
            Segment::AnyRemaining => f.write_str(ANY_REMAINING),
        }
    }
}

/// Hierarchical subtopic such as `sports.hockey`, split on a separator.
///
/// The separator is part of the value: two subtopics parsed with different
/// separators are never compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subtopic {
    value: String,
    separator: char,
    segments: Vec<Segment>,
}

impl Subtopic {
    pub fn parse(value: &str, separator: char) -> Result<Self> {
        if value.is_empty() {
            return Ok(Self::empty(separator));
        }

        let parts: Vec<&str> = value.split(separator).collect();
        let last = parts.len() - 1;
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.into_iter().enumerate() {
            let seg = match part {
                "" => {
                    return Err(BrokerError::InvalidSubtopic(format!("empty segment in `{value}`")));
                }
                ANY => Segment::Any,
                ANY_REMAINING if i == last => Segment::AnyRemaining,
                ANY_REMAINING => {
                    return Err(BrokerError::InvalidSubtopic(format!(
                        "`{ANY_REMAINING}` is only allowed as the last segment, `{value}`"
                    )));
                }
                s if s.contains('*') => {
                    return Err(BrokerError::InvalidSubtopic(format!(
                        "wildcard must occupy a whole segment, `{value}`"
                    )));
                }
                s => Segment::Literal(s.to_owned()),
            };
            segments.push(seg);
        }
        Ok(Self { value: value.to_owned(), separator, segments })
    }

    /// Parses a subtopic a message is published to, wildcards are rejected
    pub fn parse_producer(value: &str, separator: char) -> Result<Self> {
        let s = Self::parse(value, separator)?;
        if s.contains_wildcard() {
            return Err(BrokerError::InvalidSubtopic(format!("messages cannot be sent to wildcard subtopic `{value}`")));
        }
        Ok(s)
    }

    #[inline]
    pub fn empty(separator: char) -> Self {
        Self { value: String::new(), separator, segments: Vec::new() }
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    #[inline]
    pub fn separator(&self) -> char {
        self.separator
    }

    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[inline]
    pub fn contains_wildcard(&self) -> bool {
        self.segments.iter().any(|s| !matches!(s, Segment::Literal(_)))
    }

    #[inline]
    pub fn is_hierarchical(&self) -> bool {
        self.segments.len() > 1
    }

    /// Whether this (candidate) subtopic is matched by `pattern`
    pub fn matches(&self, pattern: &Subtopic) -> Result<bool> {
        if self.separator != pattern.separator {
            return Err(BrokerError::Configuration(format!(
                "cannot compare subtopic `{}` (separator {:?}) with `{}` (separator {:?})",
                self.value, self.separator, pattern.value, pattern.separator
            )));
        }
        Ok(self.matches_unchecked(pattern))
    }

    pub(crate) fn matches_unchecked(&self, pattern: &Subtopic) -> bool {
        let mut candidate = self.segments.iter();
        for p in pattern.segments.iter() {
            match (p, candidate.next()) {
                (Segment::AnyRemaining, _) => return true,
                (Segment::Any, Some(_)) => {}
                (Segment::Literal(p), Some(Segment::Literal(c))) if p == c => {}
                _ => return false,
            }
        }
        candidate.next().is_none()
    }
}

impl fmt::Display for Subtopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl Serialize for Subtopic {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Subtopic {
        Subtopic::parse(v, '.').unwrap()
    }

    fn matches(candidate: &str, pattern: &str) -> bool {
        s(candidate).matches(&s(pattern)).unwrap()
    }

    #[test]
    fn subtopic_matches() {
        for v in ["a", "a.b", "sports.hockey.nhl", ""] {
            assert!(matches(v, v), "{v}");
        }
        assert!(matches("a.b", "a.*"));
        assert!(!matches("a.b.c", "a.*"));
        assert!(matches("a.b.c", "a.**"));
        assert!(matches("a", "a.**"));
        assert!(matches("a.b", "*.b"));
        assert!(!matches("a.B", "a.b"));
        assert!(!matches("a", "a.b"));
        assert!(!matches("a.b", "a"));
        assert!(!matches("a", ""));
        assert!(!matches("", "a"));
        assert!(matches("x.y.z", "**"));
    }

    #[test]
    fn subtopic_properties() {
        let t = s("sports.*");
        assert!(t.contains_wildcard());
        assert!(t.is_hierarchical());
        assert_eq!(t.segments(), &[Segment::Literal("sports".into()), Segment::Any]);
        assert_eq!(t.to_string(), "sports.*");

        let t = s("sports");
        assert!(!t.contains_wildcard());
        assert!(!t.is_hierarchical());
        assert!(s("").is_empty());
    }

    #[test]
    fn subtopic_invalid() {
        for v in ["a..b", ".a", "a.", "a*", "a.**.b", "*x.y"] {
            assert!(matches!(Subtopic::parse(v, '.'), Err(BrokerError::InvalidSubtopic(_))), "{v}");
        }
        assert!(Subtopic::parse_producer("a.*", '.').is_err());
        assert!(Subtopic::parse_producer("a.b", '.').is_ok());
    }

    #[test]
    fn subtopic_separator_mismatch() {
        let a = Subtopic::parse("a/b", '/').unwrap();
        let b = s("a.b");
        assert!(matches!(a.matches(&b), Err(BrokerError::Configuration(_))));
        assert!(a.matches(&Subtopic::parse("a/*", '/').unwrap()).unwrap());
    }
}
