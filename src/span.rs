//! Key spans and span matching.

use crate::types::{Key, KEY_MAX, KEY_MIN};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open key range `[key, end_key)`.
///
/// An empty `end_key` denotes the single key `key`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub key: Key,
    pub end_key: Key,
}

impl Span {
    pub fn new(key: impl Into<Key>, end_key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            end_key: end_key.into(),
        }
    }

    /// Span covering a single key.
    pub fn point(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            end_key: Key::default(),
        }
    }

    /// Span covering every key.
    pub fn all() -> Self {
        Self::new(KEY_MIN, KEY_MAX)
    }

    pub fn is_point(&self) -> bool {
        self.end_key.is_empty()
    }

    /// Exclusive upper bound, treating point spans as `[key, key\0)`.
    fn exclusive_end(&self) -> Vec<u8> {
        if self.is_point() {
            let mut end = self.key.0.clone();
            end.push(0);
            end
        } else {
            self.end_key.0.clone()
        }
    }

    /// A span is valid if it is a point or its end is after its start.
    pub fn valid(&self) -> bool {
        self.is_point() || self.key < self.end_key
    }

    /// Whether `key` lies inside the span.
    pub fn contains_key(&self, key: &Key) -> bool {
        if self.is_point() {
            return self.key == *key;
        }
        self.key <= *key && *key < self.end_key
    }

    /// Whether `other` lies entirely inside the span.
    pub fn contains(&self, other: &Span) -> bool {
        self.key <= other.key && other.exclusive_end() <= self.exclusive_end()
    }

    /// Whether the two spans share at least one key.
    pub fn overlaps(&self, other: &Span) -> bool {
        if !self.valid() || !other.valid() {
            return false;
        }
        self.key.0 < other.exclusive_end() && other.key.0 < self.exclusive_end()
    }

    /// The keys common to both spans, if any.
    pub fn intersect(&self, other: &Span) -> Option<Span> {
        if !self.overlaps(other) {
            return None;
        }
        if self.is_point() {
            return Some(self.clone());
        }
        if other.is_point() {
            return Some(other.clone());
        }
        let key = self.key.clone().max(other.key.clone());
        let end_key = self.end_key.clone().min(other.end_key.clone());
        Some(Span { key, end_key })
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_point() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "[{}, {})", self.key, self.end_key)
        }
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span{}", self)
    }
}
