//! Tag sets and right-biased tag propagation.
//!
//! Every unit carries the union of the naming-context base tags, the tags the
//! unit itself requires (cluster discovery, load-balancer subnet roles) and
//! the tags supplied by the user. Later sources win on key collision.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// An ordered set of resource tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a tag, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge `other` over `self`. Keys in `other` win.
    pub fn merge(&self, other: &Tags) -> Tags {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Tags(merged)
    }

    /// Fold a sequence of tag sets left to right; the rightmost source wins.
    pub fn merge_all<'a, I>(sources: I) -> Tags
    where
        I: IntoIterator<Item = &'a Tags>,
    {
        sources
            .into_iter()
            .fold(Tags::new(), |acc, next| acc.merge(next))
    }

    /// JSON object form used in unit attributes
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl From<BTreeMap<String, String>> for Tags {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K, V> FromIterator<(K, V)> for Tags
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = (&'a String, &'a String);
    type IntoIter = std::collections::btree_map::Iter<'a, String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_is_right_biased() {
        let left = Tags::new().with("a", "1");
        let right = Tags::new().with("a", "2").with("b", "3");

        let merged = left.merge(&right);
        assert_eq!(merged.get("a"), Some("2"));
        assert_eq!(merged.get("b"), Some("3"));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_does_not_mutate_inputs() {
        let left = Tags::new().with("a", "1");
        let right = Tags::new().with("a", "2");
        let _ = left.merge(&right);
        assert_eq!(left.get("a"), Some("1"));
    }

    #[test]
    fn test_merge_all_rightmost_wins() {
        let base = Tags::new().with("Name", "acme").with("Stage", "prod");
        let required = Tags::new().with("kubernetes.io/role/elb", "1");
        let user = Tags::new().with("Stage", "staging");

        let merged = Tags::merge_all([&base, &required, &user]);
        assert_eq!(merged.get("Stage"), Some("staging"));
        assert_eq!(merged.get("kubernetes.io/role/elb"), Some("1"));
        assert_eq!(merged.get("Name"), Some("acme"));
    }

    #[test]
    fn test_to_json() {
        let tags = Tags::new().with("Team", "platform");
        assert_eq!(tags.to_json(), serde_json::json!({"Team": "platform"}));
    }
}
