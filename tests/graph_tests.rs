//! Dependency graph tests
//!
//! Property tests over random acyclic unit sets: creation order puts every
//! producer before its consumers, destroy order is the exact reverse, and
//! waves never hold a unit next to one of its producers.

use eksform::error::Error;
use eksform::graph::{DependencyGraph, OutputRef, Unit, UnitKind, UnitSet};
use eksform::sources::{names, ModuleCatalog};
use proptest::prelude::*;
use std::collections::HashMap;

fn unit(id: &str) -> Unit {
    let pin = ModuleCatalog::defaults().get(names::VPC).unwrap().clone();
    Unit::new(id, UnitKind::Vpc, pin)
}

/// A random DAG: unit `i` may only depend on units `0..i`.
fn dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..24).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                if i == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    prop::collection::vec(0..i, 0..=i.min(4)).boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

fn build(edges: &[Vec<usize>]) -> (UnitSet, DependencyGraph) {
    let mut units = UnitSet::new();
    for (i, deps) in edges.iter().enumerate() {
        let mut u = unit(&format!("u{}", i));
        for (k, dep) in deps.iter().enumerate() {
            // Mix explicit ordering with output references
            if k % 2 == 0 {
                u = u.depends_on(format!("u{}", dep));
            } else {
                u = u.attr(format!("ref{}", k), OutputRef::required(format!("u{}", dep), "id"));
            }
        }
        units.insert(u).unwrap();
    }
    let graph = DependencyGraph::build(&units).unwrap();
    (units, graph)
}

proptest! {
    #[test]
    fn creation_order_respects_dependencies(edges in dag()) {
        let (_, graph) = build(&edges);
        let order = graph.creation_order().unwrap();
        prop_assert_eq!(order.len(), edges.len());

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        for (i, deps) in edges.iter().enumerate() {
            let consumer = format!("u{}", i);
            for dep in deps {
                let producer = format!("u{}", dep);
                prop_assert!(position[producer.as_str()] < position[consumer.as_str()]);
            }
        }
    }

    #[test]
    fn destroy_order_reverses_creation(edges in dag()) {
        let (_, graph) = build(&edges);
        let mut creation = graph.creation_order().unwrap();
        creation.reverse();
        prop_assert_eq!(graph.destroy_order().unwrap(), creation);
    }

    #[test]
    fn waves_separate_producers_and_consumers(edges in dag()) {
        let (_, graph) = build(&edges);
        let waves = graph.waves().unwrap();

        let wave_of: HashMap<&str, usize> = waves
            .iter()
            .enumerate()
            .flat_map(|(w, ids)| ids.iter().map(move |id| (id.as_str(), w)))
            .collect();
        prop_assert_eq!(wave_of.len(), edges.len());

        for (i, deps) in edges.iter().enumerate() {
            let consumer = format!("u{}", i);
            for dep in deps {
                let producer = format!("u{}", dep);
                prop_assert!(wave_of[producer.as_str()] < wave_of[consumer.as_str()]);
            }
        }
    }

    #[test]
    fn order_is_deterministic(edges in dag()) {
        let (_, first) = build(&edges);
        let (_, second) = build(&edges);
        prop_assert_eq!(first.creation_order().unwrap(), second.creation_order().unwrap());
    }

    #[test]
    fn dependents_are_transitive(edges in dag()) {
        let (_, graph) = build(&edges);
        for (i, deps) in edges.iter().enumerate() {
            let consumer = format!("u{}", i);
            for dep in deps {
                let dependents = graph.get_dependents(&format!("u{}", dep));
                prop_assert!(dependents.contains(&consumer));
                // and everything downstream of the consumer as well
                for downstream in graph.get_dependents(&consumer) {
                    prop_assert!(dependents.contains(&downstream));
                }
            }
        }
    }
}

#[test]
fn test_cycle_is_rejected() {
    let mut units = UnitSet::new();
    units.insert(unit("a").depends_on("b")).unwrap();
    units
        .insert(unit("b").attr("x", OutputRef::required("a", "id")))
        .unwrap();

    match DependencyGraph::build(&units) {
        Err(Error::DependencyCycle { units }) => {
            assert!(units.contains(&"a".to_string()));
            assert!(units.contains(&"b".to_string()));
        }
        other => panic!("expected a cycle, got {:?}", other.map(|g| g.node_count())),
    }
}

#[test]
fn test_undeclared_reference_is_rejected() {
    let mut units = UnitSet::new();
    units
        .insert(unit("a").attr("x", OutputRef::required("missing", "id")))
        .unwrap();

    assert!(matches!(
        DependencyGraph::build(&units),
        Err(Error::InvalidReference { target, .. }) if target == "missing"
    ));
}

#[test]
fn test_optional_reference_to_undeclared_unit_adds_no_edge() {
    let mut units = UnitSet::new();
    units
        .insert(unit("a").attr("x", OutputRef::optional("missing", "id")))
        .unwrap();

    let graph = DependencyGraph::build(&units).unwrap();
    assert_eq!(graph.node_count(), 1);
    assert_eq!(graph.edge_count(), 0);
}

#[test]
fn test_dot_lists_every_unit() {
    let (_, graph) = build(&[vec![], vec![0], vec![0, 1]]);
    let dot = graph.to_dot();
    assert!(dot.starts_with("digraph units {"));
    for id in ["u0", "u1", "u2"] {
        assert!(dot.contains(&format!("\"{}\"", id)));
    }
}
