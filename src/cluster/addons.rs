//! Cluster add-ons.
//!
//! Each add-on is its own unit. Add-ons wait on the node group so that
//! workloads like CoreDNS have somewhere to schedule.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::iam::VPC_CNI_ROLE_UNIT;
use super::CLUSTER_UNIT;
use crate::error::{Error, Result};
use crate::graph::{AttrValue, Declare, OutputRef, Unit, UnitId, UnitKind};
use crate::nodegroup::NODE_GROUP_UNIT;
use crate::sources::{names, ModuleCatalog};

/// How the add-on handles fields changed outside of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolution {
    #[default]
    Overwrite,
    None,
    /// Only valid on update
    Preserve,
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictResolution::Overwrite => "OVERWRITE",
            ConflictResolution::None => "NONE",
            ConflictResolution::Preserve => "PRESERVE",
        };
        f.write_str(s)
    }
}

/// One managed add-on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonDescriptor {
    pub name: String,
    /// `None` installs the latest version compatible with the cluster
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub resolve_conflicts_on_create: ConflictResolution,
    #[serde(default)]
    pub resolve_conflicts_on_update: ConflictResolution,
    #[serde(skip)]
    pub service_account_role: Option<OutputRef>,
    #[serde(default)]
    pub configuration_values: Option<Value>,
}

impl AddonDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            resolve_conflicts_on_create: ConflictResolution::Overwrite,
            resolve_conflicts_on_update: ConflictResolution::Overwrite,
            service_account_role: None,
            configuration_values: None,
        }
    }

    /// The VPC CNI add-on, bound to the IRSA role when that unit exists.
    pub fn vpc_cni() -> Self {
        Self {
            service_account_role: Some(OutputRef::optional(VPC_CNI_ROLE_UNIT, "role_arn")),
            ..Self::new("vpc-cni")
        }
    }

    /// Add-ons installed when the stack does not list any
    pub fn defaults() -> Vec<Self> {
        vec![Self::new("coredns"), Self::new("kube-proxy"), Self::vpc_cni()]
    }

    pub fn unit_id(&self) -> UnitId {
        format!("addon.{}", self.name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::invalid_field("addon", "name", "must not be empty"));
        }
        if self.resolve_conflicts_on_create == ConflictResolution::Preserve {
            return Err(Error::invalid_field(
                self.unit_id(),
                "resolve_conflicts_on_create",
                "PRESERVE is only valid on update",
            ));
        }
        if let Some(version) = &self.version {
            if !version.starts_with('v') {
                return Err(Error::invalid_field(
                    self.unit_id(),
                    "version",
                    format!("'{}' must look like v1.11.1-eksbuild.1", version),
                ));
            }
        }
        Ok(())
    }
}

impl Declare for AddonDescriptor {
    fn declare(&self, catalog: &ModuleCatalog) -> Result<Unit> {
        self.validate()?;

        let role = match &self.service_account_role {
            Some(r) => AttrValue::Ref(r.clone()),
            None => AttrValue::Literal(Value::Null),
        };
        let configuration = match &self.configuration_values {
            Some(v) => Value::String(v.to_string()),
            None => Value::Null,
        };

        Ok(Unit::new(self.unit_id(), UnitKind::Addon, catalog.get(names::ADDON)?.clone())
            .depends_on(CLUSTER_UNIT)
            .depends_on(NODE_GROUP_UNIT)
            .attr("cluster_name", OutputRef::required(CLUSTER_UNIT, "cluster_name"))
            .attr("addon_name", self.name.as_str())
            .attr(
                "addon_version",
                self.version.clone().map(Value::String).unwrap_or(Value::Null),
            )
            .attr(
                "resolve_conflicts_on_create",
                self.resolve_conflicts_on_create.to_string(),
            )
            .attr(
                "resolve_conflicts_on_update",
                self.resolve_conflicts_on_update.to_string(),
            )
            .attr("service_account_role_arn", role)
            .attr("configuration_values", configuration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let names: Vec<String> = AddonDescriptor::defaults().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["coredns", "kube-proxy", "vpc-cni"]);
    }

    #[test]
    fn test_addon_waits_on_node_group() {
        let unit = AddonDescriptor::new("coredns")
            .declare(&ModuleCatalog::defaults())
            .unwrap();
        assert_eq!(unit.id, "addon.coredns");
        assert_eq!(unit.depends_on, vec!["cluster", "node_group"]);
        assert_eq!(unit.declared()["addon_version"], Value::Null);
    }

    #[test]
    fn test_vpc_cni_role_reference_is_optional() {
        let unit = AddonDescriptor::vpc_cni()
            .declare(&ModuleCatalog::defaults())
            .unwrap();
        let (field, reference) = unit
            .references()
            .into_iter()
            .find(|(_, r)| r.unit == VPC_CNI_ROLE_UNIT)
            .unwrap();
        assert_eq!(field, "service_account_role_arn");
        assert!(reference.optional);
    }

    #[test]
    fn test_preserve_on_create_rejected() {
        let mut addon = AddonDescriptor::new("coredns");
        addon.resolve_conflicts_on_create = ConflictResolution::Preserve;
        assert!(matches!(addon.validate(), Err(Error::InvalidField { .. })));
    }

    #[test]
    fn test_configuration_values_are_json_encoded() {
        let mut addon = AddonDescriptor::new("coredns");
        addon.configuration_values = Some(serde_json::json!({"replicaCount": 3}));
        let unit = addon.declare(&ModuleCatalog::defaults()).unwrap();
        assert_eq!(
            unit.declared()["configuration_values"],
            Value::String("{\"replicaCount\":3}".into())
        );
    }
}
