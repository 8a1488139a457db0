//! Owned property maps copied out of server announcements
//!
//! PipeWire hands property dicts to callbacks as borrowed `DictRef`s that die
//! with the callback. The mirror keeps owned copies so resolvers can run as
//! pure queries between pumps, with missing-key handling explicit at each
//! call site instead of buried in stringly-typed lookups.

use std::collections::BTreeMap;
use std::str::FromStr;

/// String-keyed property map with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Props {
    entries: BTreeMap<String, String>,
}

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Parse a value through `FromStr`; missing key and parse failure both
    /// come back as `None`.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Props {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Self::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}
