//! Ordered, case-insensitive, duplicate-preserving header collection.
//!
//! # Design Decisions
//! - Storage is a plain list of `(name, value)` pairs so wire order and
//!   duplicate keys survive a round trip through a callback
//! - A lowercase-name index maps each key to its positions in the list
//! - Names keep the casing they were inserted with

use std::collections::HashMap;
use std::fmt;

use http::HeaderMap;

/// Header collection handed to callbacks.
#[derive(Debug, Clone, Default)]
pub struct HeaderCollection {
    entries: Vec<(String, String)>,
    index: HashMap<String, Vec<usize>>,
}

impl HeaderCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let position = self.entries.len();
        self.index
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(position);
        self.entries.push((name, value.into()));
    }

    /// Replace every value for `name` with a single value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.append(name, value);
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.index
            .get(&name.to_ascii_lowercase())
            .and_then(|positions| positions.first())
            .map(|&i| self.entries[i].1.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.index
            .get(&name.to_ascii_lowercase())
            .into_iter()
            .flatten()
            .map(move |&i| self.entries[i].1.as_str())
    }

    /// Whether at least one value exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_ascii_lowercase())
    }

    /// Remove every value for `name`. Returns true if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let key = name.to_ascii_lowercase();
        if self.index.remove(&key).is_none() {
            return false;
        }
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(&key));
        self.reindex();
        true
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Iterate over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Distinct names in first-seen order.
    pub fn names(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.entries
            .iter()
            .filter(|(n, _)| seen.insert(n.to_ascii_lowercase()))
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Number of `(name, value)` entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build from a wire header map. Non-ASCII values are decoded lossily.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map {
            headers.append(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        headers
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, (name, _)) in self.entries.iter().enumerate() {
            self.index.entry(name.to_ascii_lowercase()).or_default().push(i);
        }
    }
}

/// Raw `Name: value` lines, as recorded by diagnostics.
impl fmt::Display for HeaderCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{}: {}\r\n", name, value)?;
        }
        Ok(())
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderCollection {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}
