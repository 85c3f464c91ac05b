//! Tag propagation tests
//!
//! Tag merging is a right-biased union: associative, with the empty set as
//! identity, and the rightmost source deciding every collision.

use eksform::context::NamingContext;
use eksform::tags::Tags;
use proptest::prelude::*;
use std::collections::BTreeMap;

fn tags() -> impl Strategy<Value = Tags> {
    prop::collection::btree_map("[a-e]{1,2}", "[a-z0-9]{0,4}", 0..8).prop_map(Tags::from)
}

proptest! {
    #[test]
    fn merge_is_associative(a in tags(), b in tags(), c in tags()) {
        prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    #[test]
    fn empty_is_identity(a in tags()) {
        prop_assert_eq!(a.merge(&Tags::new()), a.clone());
        prop_assert_eq!(Tags::new().merge(&a), a);
    }

    #[test]
    fn rightmost_wins(a in tags(), b in tags()) {
        let merged = a.merge(&b);
        for (key, value) in b.iter() {
            prop_assert_eq!(merged.get(key), Some(value));
        }
        for (key, value) in a.iter() {
            if !b.contains_key(key) {
                prop_assert_eq!(merged.get(key), Some(value));
            }
        }
        let keys: std::collections::BTreeSet<&str> =
            a.iter().chain(b.iter()).map(|(k, _)| k).collect();
        prop_assert_eq!(merged.len(), keys.len());
    }

    #[test]
    fn merge_all_matches_fold(sources in prop::collection::vec(tags(), 0..5)) {
        let folded = sources.iter().fold(Tags::new(), |acc, t| acc.merge(t));
        prop_assert_eq!(Tags::merge_all(&sources), folded);
    }
}

#[test]
fn test_user_tags_override_generated() {
    let generated = Tags::new()
        .with("Name", "acme-eks")
        .with("kubernetes.io/role/elb", "1");
    let user: Tags = [("Name", "custom")].into_iter().collect();

    let merged = generated.merge(&user);
    assert_eq!(merged.get("Name"), Some("custom"));
    assert_eq!(merged.get("kubernetes.io/role/elb"), Some("1"));
}

#[test]
fn test_child_context_carries_parent_tags() {
    let parent = NamingContext::named("eks")
        .with_namespace("acme")
        .with_tags(Tags::new().with("CostCenter", "platform"));
    let child = parent.with_attributes(["workers"]);

    let tags = child.tags();
    assert_eq!(tags.get("CostCenter"), Some("platform"));
    assert_eq!(tags.get("Name"), Some("acme-eks-workers"));
}

#[test]
fn test_to_json_is_flat_object() {
    let tags = Tags::from(BTreeMap::from([("a".to_string(), "1".to_string())]));
    assert_eq!(tags.to_json(), serde_json::json!({ "a": "1" }));
}
