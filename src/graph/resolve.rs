//! Lazy output resolution.
//!
//! A unit's attribute tree is turned into concrete JSON only after all of its
//! producers have completed. Optional references to producers that are not
//! part of the stack resolve to null.

use std::collections::HashMap;

use serde_json::Value;

use super::{AttrValue, OutputRef, Unit, UnitId};
use crate::error::{Error, Result};

/// Named outputs of one unit
pub type OutputMap = serde_json::Map<String, Value>;

/// Outputs of every completed unit.
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    by_unit: HashMap<UnitId, OutputMap>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outputs of a completed unit
    pub fn insert(&mut self, unit: impl Into<UnitId>, outputs: OutputMap) {
        self.by_unit.insert(unit.into(), outputs);
    }

    pub fn remove(&mut self, unit: &str) -> Option<OutputMap> {
        self.by_unit.remove(unit)
    }

    pub fn get(&self, unit: &str) -> Option<&OutputMap> {
        self.by_unit.get(unit)
    }

    /// Whether the producer has completed
    pub fn has_unit(&self, unit: &str) -> bool {
        self.by_unit.contains_key(unit)
    }

    pub fn len(&self) -> usize {
        self.by_unit.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_unit.is_empty()
    }

    fn lookup(&self, consumer: &str, field: &str, reference: &OutputRef) -> Result<Value> {
        match self.by_unit.get(&reference.unit) {
            Some(outputs) => match outputs.get(&reference.output) {
                Some(value) => Ok(value.clone()),
                None if reference.optional => Ok(Value::Null),
                None => Err(Error::UnresolvedReference {
                    unit: consumer.to_string(),
                    field: field.to_string(),
                    target: reference.unit.clone(),
                    output: reference.output.clone(),
                }),
            },
            None if reference.optional => Ok(Value::Null),
            None => Err(Error::UnresolvedReference {
                unit: consumer.to_string(),
                field: field.to_string(),
                target: reference.unit.clone(),
                output: reference.output.clone(),
            }),
        }
    }

    fn resolve(&self, consumer: &str, field: &str, value: &AttrValue) -> Result<Value> {
        match value {
            AttrValue::Literal(v) => Ok(v.clone()),
            AttrValue::Ref(r) => self.lookup(consumer, field, r),
            AttrValue::List(items) => items
                .iter()
                .map(|item| self.resolve(consumer, field, item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            AttrValue::Map(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.resolve(consumer, field, v)?)))
                .collect::<Result<OutputMap>>()
                .map(Value::Object),
            AttrValue::Concat(items) => {
                let mut flat = Vec::new();
                for item in items {
                    match self.resolve(consumer, field, item)? {
                        Value::Null => {}
                        Value::Array(values) => flat.extend(values),
                        other => flat.push(other),
                    }
                }
                Ok(Value::Array(flat))
            }
        }
    }
}

impl FromIterator<(UnitId, OutputMap)> for Outputs {
    fn from_iter<T: IntoIterator<Item = (UnitId, OutputMap)>>(iter: T) -> Self {
        Self {
            by_unit: iter.into_iter().collect(),
        }
    }
}

/// Resolve a unit's attributes against the outputs of completed producers.
pub fn resolve_attributes(unit: &Unit, outputs: &Outputs) -> Result<OutputMap> {
    unit.attributes
        .iter()
        .map(|(field, value)| Ok((field.clone(), outputs.resolve(&unit.id, field, value)?)))
        .collect()
}
