//! Unit declarations and the dependency graph between them.
//!
//! A [`Unit`] is one declared configuration block backed by a pinned module.
//! Its attributes form a tree of literals and [`OutputRef`]s; every reference
//! is an implicit edge to the producing unit. Explicit `depends_on` entries
//! add ordering edges without data flow.
//!
//! ```text
//!  context ─► vpc ─► subnets.* ─► cluster ─► iam.vpc_cni_role ─┐
//!                        │            │                          ▼
//!                        └──(private)─┴─► node_group ───────► addon.*
//! ```

pub mod dependencies;
pub mod resolve;

use std::fmt;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::sources::{ModuleCatalog, ModulePin};

pub use dependencies::{DependencyGraph, DependencyNode, DependencyType, UnitDependency};
pub use resolve::{resolve_attributes, OutputMap, Outputs};

/// Unit identifier (`vpc`, `subnets.private.us-east-2a`, `addon.coredns`)
pub type UnitId = String;

/// The kind of a declared unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Naming and caller identity; data only
    Context,
    Vpc,
    SubnetGroup,
    Cluster,
    IamRole,
    NodeGroup,
    Addon,
}

impl UnitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Context => "context",
            UnitKind::Vpc => "vpc",
            UnitKind::SubnetGroup => "subnet_group",
            UnitKind::Cluster => "cluster",
            UnitKind::IamRole => "iam_role",
            UnitKind::NodeGroup => "node_group",
            UnitKind::Addon => "addon",
        }
    }

    /// Whether the unit owns a provider resource that destroy must remove
    pub fn is_destructible(&self) -> bool {
        !matches!(self, UnitKind::Context)
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a named output of another unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub unit: UnitId,
    pub output: String,
    /// Resolves to null instead of failing when the producer is not declared
    pub optional: bool,
}

impl OutputRef {
    pub fn required(unit: impl Into<UnitId>, output: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            output: output.into(),
            optional: false,
        }
    }

    pub fn optional(unit: impl Into<UnitId>, output: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            output: output.into(),
            optional: true,
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.unit, self.output)
    }
}

/// An attribute value: a literal, a reference, or a composite of both.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Literal(Value),
    Ref(OutputRef),
    List(Vec<AttrValue>),
    Map(IndexMap<String, AttrValue>),
    /// Resolves each item and flattens arrays into one list
    Concat(Vec<AttrValue>),
}

impl AttrValue {
    pub fn literal(value: impl Into<Value>) -> Self {
        AttrValue::Literal(value.into())
    }

    /// Literal from anything serializable. Serialization failures become null.
    pub fn from_serialize<T: Serialize>(value: &T) -> Self {
        AttrValue::Literal(serde_json::to_value(value).unwrap_or(Value::Null))
    }

    /// Every reference in this tree, depth first
    pub fn references(&self) -> Vec<&OutputRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a OutputRef>) {
        match self {
            AttrValue::Literal(_) => {}
            AttrValue::Ref(r) => out.push(r),
            AttrValue::List(items) | AttrValue::Concat(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            AttrValue::Map(map) => {
                for item in map.values() {
                    item.collect_references(out);
                }
            }
        }
    }

    /// JSON form with references rendered as `${unit.output}` placeholders.
    ///
    /// This is what gets diffed and fingerprinted, so it must not depend on
    /// any provider output.
    pub fn render_symbolic(&self) -> Value {
        match self {
            AttrValue::Literal(v) => v.clone(),
            AttrValue::Ref(r) => Value::String(r.to_string()),
            AttrValue::List(items) => Value::Array(items.iter().map(Self::render_symbolic).collect()),
            AttrValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.render_symbolic()))
                    .collect(),
            ),
            AttrValue::Concat(items) => {
                json!({ "concat": items.iter().map(Self::render_symbolic).collect::<Vec<_>>() })
            }
        }
    }
}

impl From<OutputRef> for AttrValue {
    fn from(r: OutputRef) -> Self {
        AttrValue::Ref(r)
    }
}

/// Create, update and delete bounds for a unit's provider operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(30 * 60),
            update: Duration::from_secs(60 * 60),
            delete: Duration::from_secs(30 * 60),
        }
    }
}

impl Timeouts {
    /// Route operations: 5 minute create, 10 minute delete
    pub fn routes(update: Duration) -> Self {
        Self {
            create: Duration::from_secs(5 * 60),
            update,
            delete: Duration::from_secs(10 * 60),
        }
    }

    pub fn uniform(duration: Duration) -> Self {
        Self {
            create: duration,
            update: duration,
            delete: duration,
        }
    }
}

/// A declared unit.
#[derive(Debug, Clone)]
pub struct Unit {
    pub id: UnitId,
    pub kind: UnitKind,
    pub module: ModulePin,
    pub attributes: IndexMap<String, AttrValue>,
    pub depends_on: Vec<UnitId>,
    pub timeouts: Timeouts,
    /// Attributes whose change forces replacement
    pub force_new: Vec<String>,
}

impl Unit {
    pub fn new(id: impl Into<UnitId>, kind: UnitKind, module: ModulePin) -> Self {
        Self {
            id: id.into(),
            kind,
            module,
            attributes: IndexMap::new(),
            depends_on: Vec::new(),
            timeouts: Timeouts::default(),
            force_new: Vec::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl Into<AttrValueArg>) -> Self {
        self.attributes.insert(key.into(), value.into().0);
        self
    }

    pub fn depends_on(mut self, unit: impl Into<UnitId>) -> Self {
        let unit = unit.into();
        if !self.depends_on.contains(&unit) {
            self.depends_on.push(unit);
        }
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn force_new(mut self, attribute: impl Into<String>) -> Self {
        self.force_new.push(attribute.into());
        self
    }

    /// All (field, reference) pairs in the attribute tree
    pub fn references(&self) -> Vec<(&str, &OutputRef)> {
        self.attributes
            .iter()
            .flat_map(|(field, value)| {
                value
                    .references()
                    .into_iter()
                    .map(move |r| (field.as_str(), r))
            })
            .collect()
    }

    /// Symbolic JSON form of the attributes
    pub fn declared(&self) -> Value {
        Value::Object(
            self.attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.render_symbolic()))
                .collect(),
        )
    }

    /// SHA-256 over kind, module digest, declared attributes and explicit
    /// dependencies. Equal fingerprints mean nothing to reconcile.
    pub fn fingerprint(&self) -> String {
        let mut depends_on = self.depends_on.clone();
        depends_on.sort();
        let canonical = json!({
            "kind": self.kind,
            "module": self.module.digest,
            "attributes": self.declared(),
            "depends_on": depends_on,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Conversion helper so `Unit::attr` accepts literals, references and trees.
pub struct AttrValueArg(AttrValue);

impl From<AttrValue> for AttrValueArg {
    fn from(v: AttrValue) -> Self {
        Self(v)
    }
}

impl From<OutputRef> for AttrValueArg {
    fn from(r: OutputRef) -> Self {
        Self(AttrValue::Ref(r))
    }
}

impl From<Value> for AttrValueArg {
    fn from(v: Value) -> Self {
        Self(AttrValue::Literal(v))
    }
}

impl From<&str> for AttrValueArg {
    fn from(v: &str) -> Self {
        Self(AttrValue::literal(v))
    }
}

impl From<String> for AttrValueArg {
    fn from(v: String) -> Self {
        Self(AttrValue::literal(v))
    }
}

impl From<bool> for AttrValueArg {
    fn from(v: bool) -> Self {
        Self(AttrValue::literal(v))
    }
}

impl From<u32> for AttrValueArg {
    fn from(v: u32) -> Self {
        Self(AttrValue::literal(v))
    }
}

/// Descriptors that can be turned into a unit declaration.
pub trait Declare {
    /// Produce the unit, taking the module pin from the catalog
    fn declare(&self, catalog: &ModuleCatalog) -> Result<Unit>;
}

/// The declared units of a stack, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct UnitSet {
    units: IndexMap<UnitId, Unit>,
}

impl UnitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit; ids must be unique
    pub fn insert(&mut self, unit: Unit) -> Result<()> {
        if self.units.contains_key(&unit.id) {
            return Err(Error::DuplicateUnit(unit.id));
        }
        self.units.insert(unit.id.clone(), unit);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Unit> {
        self.units.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &UnitId> {
        self.units.keys()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units of one kind, in declaration order
    pub fn of_kind(&self, kind: UnitKind) -> impl Iterator<Item = &Unit> {
        self.units.values().filter(move |u| u.kind == kind)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.units.get_index_of(id)
    }
}

impl FromIterator<Unit> for UnitSet {
    /// Collects units; later duplicates replace earlier ones.
    fn from_iter<T: IntoIterator<Item = Unit>>(iter: T) -> Self {
        Self {
            units: iter.into_iter().map(|u| (u.id.clone(), u)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::names;

    fn pin() -> ModulePin {
        ModuleCatalog::defaults().get(names::VPC).unwrap().clone()
    }

    #[test]
    fn test_references_are_collected_from_nested_values() {
        let unit = Unit::new("cluster", UnitKind::Cluster, pin()).attr(
            "subnet_ids",
            AttrValue::Concat(vec![
                OutputRef::required("subnets.a", "subnet_ids").into(),
                OutputRef::required("subnets.b", "subnet_ids").into(),
            ]),
        );
        let refs = unit.references();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].0, "subnet_ids");
        assert_eq!(refs[1].1.unit, "subnets.b");
    }

    #[test]
    fn test_symbolic_rendering() {
        let value = AttrValue::Map(IndexMap::from([
            ("name".to_string(), AttrValue::literal("eks")),
            (
                "vpc_id".to_string(),
                OutputRef::required("vpc", "vpc_id").into(),
            ),
        ]));
        assert_eq!(
            value.render_symbolic(),
            json!({"name": "eks", "vpc_id": "${vpc.vpc_id}"})
        );
    }

    #[test]
    fn test_fingerprint_ignores_dependency_order() {
        let a = Unit::new("x", UnitKind::Vpc, pin())
            .depends_on("a")
            .depends_on("b");
        let b = Unit::new("x", UnitKind::Vpc, pin())
            .depends_on("b")
            .depends_on("a");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_changes_with_attributes() {
        let a = Unit::new("x", UnitKind::Vpc, pin()).attr("cidr_block", "10.0.0.0/16");
        let b = Unit::new("x", UnitKind::Vpc, pin()).attr("cidr_block", "10.1.0.0/16");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_duplicate_unit_rejected() {
        let mut set = UnitSet::new();
        set.insert(Unit::new("vpc", UnitKind::Vpc, pin())).unwrap();
        let err = set.insert(Unit::new("vpc", UnitKind::Vpc, pin())).unwrap_err();
        assert!(matches!(err, Error::DuplicateUnit(id) if id == "vpc"));
    }

    #[test]
    fn test_context_is_not_destructible() {
        assert!(!UnitKind::Context.is_destructible());
        assert!(UnitKind::NodeGroup.is_destructible());
    }
}
