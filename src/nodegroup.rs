//! Managed node group.
//!
//! Worker nodes live in the private subnet groups only and join the cluster
//! through its id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cluster::CLUSTER_UNIT;
use crate::error::{Error, Result};
use crate::graph::{AttrValue, Declare, OutputRef, Unit, UnitId, UnitKind};
use crate::sources::{names, ModuleCatalog};
use crate::tags::Tags;

pub const NODE_GROUP_UNIT: &str = "node_group";

/// Desired/min/max node counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub desired_size: u32,
    pub min_size: u32,
    pub max_size: u32,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            desired_size: 2,
            min_size: 1,
            max_size: 3,
        }
    }
}

impl ScalingConfig {
    pub fn new(min_size: u32, desired_size: u32, max_size: u32) -> Self {
        Self {
            desired_size,
            min_size,
            max_size,
        }
    }

    /// `min <= desired <= max` and `max >= 1`
    pub fn validate(&self, unit: &str) -> Result<()> {
        if self.max_size < 1 || self.min_size > self.desired_size || self.desired_size > self.max_size
        {
            return Err(Error::InvalidSizing {
                unit: unit.to_string(),
                min: self.min_size,
                desired: self.desired_size,
                max: self.max_size,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapacityType {
    #[default]
    OnDemand,
    Spot,
}

impl CapacityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapacityType::OnDemand => "ON_DEMAND",
            CapacityType::Spot => "SPOT",
        }
    }
}

/// EBS volume attached at a device name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDeviceMapping {
    pub device_name: String,
    pub volume_size: u32,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    #[serde(default = "default_true")]
    pub encrypted: bool,
    #[serde(default = "default_true")]
    pub delete_on_termination: bool,
}

fn default_volume_type() -> String {
    "gp3".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for BlockDeviceMapping {
    fn default() -> Self {
        Self {
            device_name: "/dev/xvda".to_string(),
            volume_size: 100,
            volume_type: default_volume_type(),
            encrypted: true,
            delete_on_termination: true,
        }
    }
}

impl BlockDeviceMapping {
    fn validate(&self) -> Result<()> {
        if !self.device_name.starts_with("/dev/") {
            return Err(Error::invalid_field(
                NODE_GROUP_UNIT,
                "block_device_mappings",
                format!("device name '{}' must start with /dev/", self.device_name),
            ));
        }
        if !(1..=16384).contains(&self.volume_size) {
            return Err(Error::invalid_field(
                NODE_GROUP_UNIT,
                "block_device_mappings",
                format!("volume size {} GiB is out of range", self.volume_size),
            ));
        }
        Ok(())
    }
}

/// The worker node pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGroupDescriptor {
    pub name: String,
    pub private_subnet_groups: Vec<UnitId>,
    pub instance_types: Vec<String>,
    pub capacity_type: CapacityType,
    pub ami_type: String,
    pub scaling: ScalingConfig,
    pub labels: BTreeMap<String, String>,
    pub block_device_mappings: Vec<BlockDeviceMapping>,
    pub tags: Tags,
}

impl NodeGroupDescriptor {
    /// Build and validate a node group
    pub fn new(
        name: impl Into<String>,
        private_subnet_groups: Vec<UnitId>,
        instance_types: Vec<String>,
        scaling: ScalingConfig,
    ) -> Result<Self> {
        let group = Self {
            name: name.into(),
            private_subnet_groups,
            instance_types,
            capacity_type: CapacityType::default(),
            ami_type: "AL2023_x86_64_STANDARD".to_string(),
            scaling,
            labels: BTreeMap::new(),
            block_device_mappings: vec![BlockDeviceMapping::default()],
            tags: Tags::new(),
        };
        group.validate()?;
        Ok(group)
    }

    pub fn validate(&self) -> Result<()> {
        self.scaling.validate(NODE_GROUP_UNIT)?;
        if self.name.is_empty() || self.name.len() > 63 {
            return Err(Error::invalid_field(
                NODE_GROUP_UNIT,
                "name",
                "must be between 1 and 63 characters",
            ));
        }
        if self.instance_types.is_empty() {
            return Err(Error::invalid_field(
                NODE_GROUP_UNIT,
                "instance_types",
                "at least one instance type is required",
            ));
        }
        if self.private_subnet_groups.is_empty() {
            return Err(Error::invalid_field(
                NODE_GROUP_UNIT,
                "subnet_ids",
                "at least one private subnet group is required",
            ));
        }
        if let Some(bad) = self
            .private_subnet_groups
            .iter()
            .find(|g| !g.starts_with("subnets.private."))
        {
            return Err(Error::invalid_field(
                NODE_GROUP_UNIT,
                "subnet_ids",
                format!("'{}' is not a private subnet group", bad),
            ));
        }
        for mapping in &self.block_device_mappings {
            mapping.validate()?;
        }
        Ok(())
    }
}

impl Declare for NodeGroupDescriptor {
    fn declare(&self, catalog: &ModuleCatalog) -> Result<Unit> {
        self.validate()?;

        let subnet_ids = AttrValue::Concat(
            self.private_subnet_groups
                .iter()
                .map(|group| OutputRef::required(group.as_str(), "subnet_ids").into())
                .collect(),
        );

        let block_devices: serde_json::Map<String, serde_json::Value> = self
            .block_device_mappings
            .iter()
            .map(|m| {
                (
                    m.device_name.clone(),
                    json!({
                        "device_name": m.device_name,
                        "ebs": {
                            "volume_size": m.volume_size,
                            "volume_type": m.volume_type,
                            "encrypted": m.encrypted,
                            "delete_on_termination": m.delete_on_termination,
                        }
                    }),
                )
            })
            .collect();

        Ok(Unit::new(
            NODE_GROUP_UNIT,
            UnitKind::NodeGroup,
            catalog.get(names::NODE_GROUP)?.clone(),
        )
        .attr("name", self.name.as_str())
        .attr("cluster_name", OutputRef::required(CLUSTER_UNIT, "cluster_name"))
        .attr(
            "cluster_service_cidr",
            OutputRef::required(CLUSTER_UNIT, "cluster_service_cidr"),
        )
        .attr("subnet_ids", subnet_ids)
        .attr("instance_types", serde_json::to_value(&self.instance_types)?)
        .attr("capacity_type", self.capacity_type.as_str())
        .attr("ami_type", self.ami_type.as_str())
        .attr("min_size", self.scaling.min_size)
        .attr("max_size", self.scaling.max_size)
        .attr("desired_size", self.scaling.desired_size)
        .attr("labels", serde_json::to_value(&self.labels)?)
        .attr("block_device_mappings", serde_json::Value::Object(block_devices))
        .attr("tags", self.tags.to_json())
        .force_new("name"))
    }
}
