use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A header map that is case-preserving on display but case-insensitive on
/// lookup, matching the contract `Request`/`Response` expose over their
/// header tables.
///
/// Insertion order is preserved (an `IndexMap`) so serialization is
/// deterministic for a given call sequence, but callers must not rely on
/// order for cache identity: [`crate::Request::fingerprint`] sorts headers
/// explicitly before hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMap(IndexMap<String, String>);

impl HeaderMap {
    /// An empty header map.
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    fn find_key(&self, name: &str) -> Option<&String> {
        self.0.keys().find(|k| k.eq_ignore_ascii_case(name))
    }

    /// Inserts a header, replacing any existing value under a
    /// case-insensitive match of `name`. The case of `name` as first
    /// inserted is preserved for serialization and wire output.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if let Some(existing) = self.find_key(&name).cloned() {
            self.0.insert(existing, value.into());
        } else {
            self.0.insert(name, value.into());
        }
    }

    /// Returns the value for `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        let key = self.find_key(name)?;
        self.0.get(key).map(String::as_str)
    }

    /// Removes a header, matched case-insensitively.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let key = self.find_key(name)?.clone();
        self.0.shift_remove(&key)
    }

    /// Whether a header is present, matched case-insensitively.
    pub fn contains(&self, name: &str) -> bool {
        self.find_key(name).is_some()
    }

    /// Iterates headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers stored.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map holds no headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges `other` into `self`, with `other`'s values winning on
    /// conflicting (case-insensitive) keys. Used to implement the 304
    /// revalidation merge: new headers take precedence over stored ones.
    pub fn merge_overwrite(&mut self, other: &HeaderMap) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }
}

impl fmt::Display for HeaderMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            writeln!(f, "{name}: {value}")?;
        }
        Ok(())
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = HeaderMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}
