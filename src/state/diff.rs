//! Attribute Diff Engine
//!
//! Compares the declared attribute tree recorded in state with the one being
//! planned. Objects are walked key by key and reported on dotted paths
//! (`access_entries.arn:aws:iam::1:role/Admin.kubernetes_groups`); arrays and
//! scalars are compared as whole values.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use similar::{ChangeTag, TextDiff};

/// Type of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// Attribute is new
    Added,
    /// Attribute was removed
    Removed,
    /// Attribute value changed
    Modified,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Added => write!(f, "added"),
            ChangeType::Removed => write!(f, "removed"),
            ChangeType::Modified => write!(f, "modified"),
        }
    }
}

/// One changed attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Dotted path from the attribute root
    pub path: String,
    pub change_type: ChangeType,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

impl AttributeChange {
    /// Top-level attribute the change falls under
    pub fn attribute(&self) -> &str {
        self.path.split('.').next().unwrap_or(&self.path)
    }
}

/// The diff engine for comparing attribute trees
#[derive(Debug, Clone)]
pub struct DiffEngine {
    /// Depth below which objects are compared whole
    max_depth: usize,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffEngine {
    /// Create a new diff engine
    pub fn new() -> Self {
        Self { max_depth: 8 }
    }

    /// Limit how deep objects are walked
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    /// Attribute-level differences between two trees, ordered by path.
    pub fn diff(&self, old: &Value, new: &Value) -> Vec<AttributeChange> {
        let mut changes = Vec::new();
        self.walk("", old, new, 0, &mut changes);
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        changes
    }

    fn walk(
        &self,
        path: &str,
        old: &Value,
        new: &Value,
        depth: usize,
        changes: &mut Vec<AttributeChange>,
    ) {
        match (old, new) {
            (Value::Object(old_map), Value::Object(new_map)) if depth < self.max_depth => {
                for (key, old_value) in old_map {
                    let child = join(path, key);
                    match new_map.get(key) {
                        Some(new_value) => self.walk(&child, old_value, new_value, depth + 1, changes),
                        None => changes.push(AttributeChange {
                            path: child,
                            change_type: ChangeType::Removed,
                            old_value: Some(old_value.clone()),
                            new_value: None,
                        }),
                    }
                }
                for (key, new_value) in new_map {
                    if !old_map.contains_key(key) {
                        changes.push(AttributeChange {
                            path: join(path, key),
                            change_type: ChangeType::Added,
                            old_value: None,
                            new_value: Some(new_value.clone()),
                        });
                    }
                }
            }
            _ if old == new => {}
            _ => changes.push(AttributeChange {
                path: path.to_string(),
                change_type: ChangeType::Modified,
                old_value: Some(old.clone()),
                new_value: Some(new.clone()),
            }),
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

/// Represents a line diff between two text/JSON values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDiff {
    /// Lines added
    pub additions: Vec<String>,
    /// Lines removed
    pub deletions: Vec<String>,
    /// Unified diff output
    pub unified_diff: String,
}

impl StateDiff {
    /// Create a diff between two strings
    pub fn from_strings(old: &str, new: &str) -> Self {
        let diff = TextDiff::from_lines(old, new);
        let mut additions = Vec::new();
        let mut deletions = Vec::new();
        let mut unified_diff = String::new();

        for change in diff.iter_all_changes() {
            let line = change.value().trim_end();
            match change.tag() {
                ChangeTag::Insert => {
                    additions.push(line.to_string());
                    unified_diff.push_str(&format!("+{}\n", line));
                }
                ChangeTag::Delete => {
                    deletions.push(line.to_string());
                    unified_diff.push_str(&format!("-{}\n", line));
                }
                ChangeTag::Equal => {
                    unified_diff.push_str(&format!(" {}\n", line));
                }
            }
        }

        Self {
            additions,
            deletions,
            unified_diff,
        }
    }

    /// Create a diff between two JSON values
    pub fn from_json(old: &Value, new: &Value) -> Self {
        let old_str = serde_json::to_string_pretty(old).unwrap_or_default();
        let new_str = serde_json::to_string_pretty(new).unwrap_or_default();
        Self::from_strings(&old_str, &new_str)
    }

    /// Check if there are any differences
    pub fn has_changes(&self) -> bool {
        !self.additions.is_empty() || !self.deletions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_changes() {
        let tree = json!({"name": "vpc", "tags": {"Stage": "prod"}});
        assert!(DiffEngine::new().diff(&tree, &tree).is_empty());
    }

    #[test]
    fn test_nested_paths() {
        let old = json!({"name": "vpc", "tags": {"Stage": "prod", "Team": "a"}});
        let new = json!({"name": "vpc", "tags": {"Stage": "dev", "Owner": "b"}});
        let changes = DiffEngine::new().diff(&old, &new);
        let summary: Vec<(&str, ChangeType)> =
            changes.iter().map(|c| (c.path.as_str(), c.change_type)).collect();
        assert_eq!(
            summary,
            vec![
                ("tags.Owner", ChangeType::Added),
                ("tags.Stage", ChangeType::Modified),
                ("tags.Team", ChangeType::Removed),
            ]
        );
        assert_eq!(changes[1].attribute(), "tags");
    }

    #[test]
    fn test_arrays_compare_whole() {
        let old = json!({"cidr_blocks": ["10.0.0.0/18", "10.0.64.0/18"]});
        let new = json!({"cidr_blocks": ["10.0.0.0/18"]});
        let changes = DiffEngine::new().diff(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "cidr_blocks");
        assert_eq!(changes[0].change_type, ChangeType::Modified);
    }

    #[test]
    fn test_max_depth_collapses_objects() {
        let old = json!({"a": {"b": {"c": 1}}});
        let new = json!({"a": {"b": {"c": 2}}});
        let changes = DiffEngine::new().with_max_depth(1).diff(&old, &new);
        assert_eq!(changes[0].path, "a");
    }

    #[test]
    fn test_state_diff_json() {
        let old = json!({"desired_size": 2});
        let new = json!({"desired_size": 3});
        let diff = StateDiff::from_json(&old, &new);
        assert!(diff.has_changes());
        assert!(diff.unified_diff.contains("+  \"desired_size\": 3"));
    }
}
