//! Plans: what apply or destroy would do.
//!
//! A plan compares each declared unit's fingerprint with the one recorded in
//! state. Equal fingerprints are a no-op. Otherwise the declared attribute
//! trees are diffed; a change to a force-new attribute turns the update into
//! a replacement. Recorded units that are no longer declared are deleted.
//!
//! Replacing a unit destroys its resource, so every recorded consumer of it
//! is replaced too and torn down first. Consumers of a replaced data-only
//! unit are updated so they pick up its new outputs.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::cluster::{reconcile, AccessChangeSet, AccessEntryMap, CLUSTER_UNIT};
use crate::error::Result;
use crate::graph::{DependencyGraph, Unit, UnitId, UnitKind, UnitSet};
use crate::planner::Blueprint;
use crate::state::{AttributeChange, ChangeType, DiffEngine, StateRecord, UnitRecord};

/// What happens to one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    /// Delete then create
    Replace,
    NoOp,
    Delete,
}

impl Action {
    /// Plan line marker
    pub fn symbol(&self) -> &'static str {
        match self {
            Action::Create => "+",
            Action::Update => "~",
            Action::Replace => "-/+",
            Action::NoOp => " ",
            Action::Delete => "-",
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Action::NoOp)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::NoOp => "no-op",
            Action::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One unit's entry in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub unit: UnitId,
    pub kind: UnitKind,
    pub action: Action,
    /// Attribute-level differences against recorded state
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub changes: Vec<AttributeChange>,
    /// Force-new attributes that changed
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub replace_reasons: Vec<String>,
    /// Access entry operations, on the cluster unit only
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub access_changes: Option<AccessChangeSet>,
}

impl PlannedChange {
    fn new(unit: impl Into<UnitId>, kind: UnitKind, action: Action) -> Self {
        Self {
            unit: unit.into(),
            kind,
            action,
            changes: Vec::new(),
            replace_reasons: Vec::new(),
            access_changes: None,
        }
    }
}

/// Counts shown at the end of a plan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub add: usize,
    pub change: usize,
    pub destroy: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to add, {} to change, {} to destroy.",
            self.add, self.change, self.destroy
        )
    }
}

/// An ordered set of planned changes.
///
/// Deletions come first, in reverse recorded-dependency order, followed by
/// every declared unit in creation order.
#[derive(Debug, Clone)]
pub struct Plan {
    pub changes: Vec<PlannedChange>,
    pub warnings: Vec<String>,
    /// Declared units (empty for a destroy plan)
    pub units: UnitSet,
    /// Graph of the declared units
    pub graph: DependencyGraph,
    /// Graph of the recorded units, for ordering deletions
    pub recorded_graph: DependencyGraph,
    pub is_destroy: bool,
}

impl Plan {
    /// Diff a blueprint against recorded state.
    pub fn compute(blueprint: &Blueprint, state: &StateRecord) -> Result<Self> {
        let engine = DiffEngine::new();
        let recorded_graph = DependencyGraph::from_records(state.iter())?;
        let mut changes = Vec::new();

        for id in recorded_graph.destroy_order()? {
            if blueprint.units.contains(&id) {
                continue;
            }
            if let Some(record) = state.get(&id) {
                changes.push(PlannedChange::new(&record.id, record.kind, Action::Delete));
            }
        }

        // Replaced producers, and whether their resource is destroyed
        let mut replaced: HashMap<UnitId, bool> = HashMap::new();

        for id in blueprint.graph.creation_order()? {
            let Some(unit) = blueprint.units.get(&id) else {
                continue;
            };
            let dependencies = blueprint.graph.direct_dependencies(&id);
            let change = match state.get(&id) {
                None => Self::create(unit),
                Some(record) => {
                    let mut change = Self::compare(&engine, unit, record, &dependencies);
                    Self::cascade(&mut change, unit, record, &dependencies, &replaced);
                    if change.action == Action::Replace {
                        replaced.insert(unit.id.clone(), record.destructible);
                    }
                    change
                }
            };
            debug!("Planned {} for '{}'", change.action, change.unit);
            changes.push(change);
        }

        Ok(Self {
            changes,
            warnings: blueprint.warnings.clone(),
            units: blueprint.units.clone(),
            graph: blueprint.graph.clone(),
            recorded_graph,
            is_destroy: false,
        })
    }

    /// Delete every recorded unit.
    pub fn destroy(state: &StateRecord) -> Result<Self> {
        let recorded_graph = DependencyGraph::from_records(state.iter())?;
        let changes = recorded_graph
            .destroy_order()?
            .into_iter()
            .filter_map(|id| state.get(&id))
            .map(|record| PlannedChange::new(&record.id, record.kind, Action::Delete))
            .collect();

        Ok(Self {
            changes,
            warnings: Vec::new(),
            units: UnitSet::new(),
            graph: DependencyGraph::new(),
            recorded_graph,
            is_destroy: true,
        })
    }

    fn create(unit: &Unit) -> PlannedChange {
        let mut change = PlannedChange::new(&unit.id, unit.kind, Action::Create);
        if unit.id == CLUSTER_UNIT {
            change.access_changes = access_changes(None, &unit.declared());
        }
        change
    }

    fn compare(
        engine: &DiffEngine,
        unit: &Unit,
        record: &UnitRecord,
        dependencies: &[UnitId],
    ) -> PlannedChange {
        let declared = unit.declared();
        let mut recorded_deps = record.dependencies.clone();
        recorded_deps.sort();
        let mut current_deps = dependencies.to_vec();
        current_deps.sort();

        if record.fingerprint == unit.fingerprint() && recorded_deps == current_deps {
            return PlannedChange::new(&unit.id, unit.kind, Action::NoOp);
        }

        let mut changes = engine.diff(&record.declared, &declared);
        if record.module != unit.module {
            changes.push(AttributeChange {
                path: "module".to_string(),
                change_type: ChangeType::Modified,
                old_value: Some(Value::String(record.module.reference())),
                new_value: Some(Value::String(unit.module.reference())),
            });
        }
        if recorded_deps != current_deps {
            changes.push(AttributeChange {
                path: "depends_on".to_string(),
                change_type: ChangeType::Modified,
                old_value: Some(json!(recorded_deps)),
                new_value: Some(json!(current_deps)),
            });
        }

        let mut replace_reasons: Vec<String> = changes
            .iter()
            .map(|c| c.attribute())
            .filter(|attr| unit.force_new.iter().any(|f| f == attr))
            .map(str::to_string)
            .collect();
        if record.kind != unit.kind {
            replace_reasons.push("kind".to_string());
        }
        replace_reasons.dedup();

        let action = if !replace_reasons.is_empty() {
            Action::Replace
        } else {
            Action::Update
        };

        let access_changes = if unit.id == CLUSTER_UNIT {
            match action {
                Action::Replace => access_changes(None, &declared),
                _ => access_changes(Some(&record.declared), &declared),
            }
        } else {
            None
        };

        PlannedChange {
            unit: unit.id.clone(),
            kind: unit.kind,
            action,
            changes,
            replace_reasons,
            access_changes,
        }
    }

    /// Carry a producer's replacement over to a recorded consumer.
    fn cascade(
        change: &mut PlannedChange,
        unit: &Unit,
        record: &UnitRecord,
        dependencies: &[UnitId],
        replaced: &HashMap<UnitId, bool>,
    ) {
        if change.action == Action::Replace {
            return;
        }

        let mut producers: Vec<&UnitId> = record
            .dependencies
            .iter()
            .chain(dependencies.iter())
            .filter(|id| replaced.contains_key(*id))
            .collect();
        producers.sort();
        producers.dedup();
        if producers.is_empty() {
            return;
        }

        if producers.iter().any(|id| replaced.get(*id) == Some(&true)) {
            change.action = Action::Replace;
            change.replace_reasons = producers
                .iter()
                .filter(|id| replaced.get(**id) == Some(&true))
                .map(|id| format!("depends_on:{}", id))
                .collect();
            if unit.id == CLUSTER_UNIT {
                change.access_changes = access_changes(None, &unit.declared());
            }
        } else if change.action == Action::NoOp {
            change.action = Action::Update;
            if unit.id == CLUSTER_UNIT {
                change.access_changes = access_changes(Some(&record.declared), &unit.declared());
            }
        }
    }

    pub fn get(&self, unit: &str) -> Option<&PlannedChange> {
        self.changes.iter().find(|c| c.unit == unit)
    }

    /// Changes other than no-ops
    pub fn actionable(&self) -> impl Iterator<Item = &PlannedChange> {
        self.changes.iter().filter(|c| c.action.is_change())
    }

    pub fn has_changes(&self) -> bool {
        self.actionable().next().is_some()
    }

    /// Deletions and the teardown half of replacements, in reverse
    /// recorded-dependency order
    pub fn teardown(&self) -> Result<Vec<&PlannedChange>> {
        let order = self.recorded_graph.destroy_order()?;
        Ok(order
            .iter()
            .filter_map(|id| self.get(id))
            .filter(|c| matches!(c.action, Action::Delete | Action::Replace))
            .collect())
    }

    /// Units that need a provider create or update
    pub fn pending(&self) -> HashSet<&str> {
        self.changes
            .iter()
            .filter(|c| matches!(c.action, Action::Create | Action::Update | Action::Replace))
            .map(|c| c.unit.as_str())
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for change in &self.changes {
            match change.action {
                Action::Create => summary.add += 1,
                Action::Update => summary.change += 1,
                Action::Replace => {
                    summary.add += 1;
                    summary.destroy += 1;
                }
                Action::Delete => summary.destroy += 1,
                Action::NoOp => {}
            }
        }
        summary
    }

    /// Machine readable form for `--output json`
    pub fn to_json(&self) -> Value {
        json!({
            "destroy": self.is_destroy,
            "changes": self.actionable().collect::<Vec<_>>(),
            "warnings": self.warnings,
            "summary": self.summary(),
        })
    }
}

/// Access entry operations between two declared cluster trees.
fn access_changes(previous: Option<&Value>, desired: &Value) -> Option<AccessChangeSet> {
    let parse = |tree: &Value| -> AccessEntryMap {
        tree.get("access_entries")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    };
    let previous = previous.map(parse).unwrap_or_default();
    let changes = reconcile(&previous, &parse(desired));
    if changes.is_empty() {
        None
    } else {
        Some(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{names, ModuleCatalog};
    use crate::state::UnitRecord;

    fn pin() -> crate::sources::ModulePin {
        ModuleCatalog::defaults().get(names::VPC).unwrap().clone()
    }

    fn blueprint(units: Vec<Unit>) -> Blueprint {
        let units: UnitSet = units.into_iter().collect();
        let graph = DependencyGraph::build(&units).unwrap();
        Blueprint {
            context: crate::context::StackContext {
                naming: crate::context::NamingContext::named("eks"),
                provider: crate::context::ProviderContext::new(
                    "us-east-2",
                    "123456789012",
                    "arn:aws:iam::123456789012:role/Admin",
                ),
            },
            units,
            graph,
            warnings: vec![],
        }
    }

    fn vpc(cidr: &str, name: &str) -> Unit {
        Unit::new("vpc", UnitKind::Vpc, pin())
            .attr("name", name)
            .attr("ipv4_primary_cidr_block", cidr)
            .force_new("ipv4_primary_cidr_block")
    }

    fn applied(units: &[Unit]) -> StateRecord {
        let mut state = StateRecord::new();
        for unit in units {
            state.upsert(UnitRecord::new(unit, Default::default(), Default::default(), vec![]));
        }
        state
    }

    #[test]
    fn test_create_on_empty_state() {
        let plan = Plan::compute(&blueprint(vec![vpc("10.0.0.0/16", "a")]), &StateRecord::new()).unwrap();
        assert_eq!(plan.changes[0].action, Action::Create);
        assert_eq!(plan.summary().to_string(), "Plan: 1 to add, 0 to change, 0 to destroy.");
    }

    #[test]
    fn test_noop_when_fingerprint_matches() {
        let unit = vpc("10.0.0.0/16", "a");
        let plan = Plan::compute(&blueprint(vec![unit.clone()]), &applied(&[unit])).unwrap();
        assert!(!plan.has_changes());
    }

    #[test]
    fn test_update_lists_attribute_changes() {
        let state = applied(&[vpc("10.0.0.0/16", "a")]);
        let plan = Plan::compute(&blueprint(vec![vpc("10.0.0.0/16", "b")]), &state).unwrap();
        let change = plan.get("vpc").unwrap();
        assert_eq!(change.action, Action::Update);
        assert_eq!(change.changes.len(), 1);
        assert_eq!(change.changes[0].path, "name");
    }

    #[test]
    fn test_force_new_attribute_replaces() {
        let state = applied(&[vpc("10.0.0.0/16", "a")]);
        let plan = Plan::compute(&blueprint(vec![vpc("10.1.0.0/16", "a")]), &state).unwrap();
        let change = plan.get("vpc").unwrap();
        assert_eq!(change.action, Action::Replace);
        assert_eq!(change.replace_reasons, vec!["ipv4_primary_cidr_block"]);
        assert_eq!(plan.summary().to_string(), "Plan: 1 to add, 0 to change, 1 to destroy.");
    }

    #[test]
    fn test_replacement_cascades_to_consumers() {
        let subnet = Unit::new("subnets.private.a", UnitKind::SubnetGroup, pin()).depends_on("vpc");
        let mut state = StateRecord::new();
        state.upsert(UnitRecord::new(&vpc("10.0.0.0/16", "a"), Default::default(), Default::default(), vec![]));
        state.upsert(UnitRecord::new(&subnet, Default::default(), Default::default(), vec!["vpc".into()]));

        let plan = Plan::compute(&blueprint(vec![vpc("10.1.0.0/16", "a"), subnet]), &state).unwrap();
        let consumer = plan.get("subnets.private.a").unwrap();
        assert_eq!(consumer.action, Action::Replace);
        assert_eq!(consumer.replace_reasons, vec!["depends_on:vpc"]);
        assert_eq!(plan.summary().to_string(), "Plan: 2 to add, 0 to change, 2 to destroy.");

        let teardown: Vec<&str> = plan.teardown().unwrap().iter().map(|c| c.unit.as_str()).collect();
        assert_eq!(teardown, vec!["subnets.private.a", "vpc"]);
    }

    #[test]
    fn test_undeclared_units_are_deleted_first() {
        let old = Unit::new("addon.coredns", UnitKind::Addon, pin());
        let unit = vpc("10.0.0.0/16", "a");
        let state = applied(&[unit.clone(), old]);
        let plan = Plan::compute(&blueprint(vec![unit]), &state).unwrap();
        assert_eq!(plan.changes[0].unit, "addon.coredns");
        assert_eq!(plan.changes[0].action, Action::Delete);
        assert_eq!(plan.teardown().unwrap().len(), 1);
    }

    #[test]
    fn test_destroy_plan_reverses_dependencies() {
        let a = Unit::new("vpc", UnitKind::Vpc, pin());
        let b = Unit::new("cluster", UnitKind::Cluster, pin());
        let mut state = StateRecord::new();
        state.upsert(UnitRecord::new(&a, Default::default(), Default::default(), vec![]));
        state.upsert(UnitRecord::new(&b, Default::default(), Default::default(), vec!["vpc".into()]));
        let plan = Plan::destroy(&state).unwrap();
        let order: Vec<&str> = plan.changes.iter().map(|c| c.unit.as_str()).collect();
        assert_eq!(order, vec!["cluster", "vpc"]);
        assert!(plan.is_destroy);
    }
}
