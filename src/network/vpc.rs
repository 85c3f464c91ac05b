//! VPC boundary.

use serde::{Deserialize, Serialize};

use super::cidr::Ipv4Cidr;
use crate::context::CONTEXT_UNIT;
use crate::error::{Error, Result};
use crate::graph::{Declare, OutputRef, Unit, UnitKind};
use crate::sources::{names, ModuleCatalog};
use crate::tags::Tags;

pub const VPC_UNIT: &str = "vpc";

/// Smallest and largest prefix a VPC may use
const VPC_PREFIX_RANGE: std::ops::RangeInclusive<u8> = 16..=28;

/// The network boundary every other unit lives in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBoundary {
    pub name: String,
    pub cidr_block: Ipv4Cidr,
    pub assign_generated_ipv6_cidr_block: bool,
    pub enable_dns_hostnames: bool,
    pub enable_dns_support: bool,
    pub tags: Tags,
}

impl NetworkBoundary {
    pub fn new(name: impl Into<String>, cidr_block: Ipv4Cidr, tags: Tags) -> Result<Self> {
        if !VPC_PREFIX_RANGE.contains(&cidr_block.prefix_len()) {
            return Err(Error::invalid_cidr(
                cidr_block.to_string(),
                format!(
                    "VPC prefix must be between /{} and /{}",
                    VPC_PREFIX_RANGE.start(),
                    VPC_PREFIX_RANGE.end()
                ),
            ));
        }
        Ok(Self {
            name: name.into(),
            cidr_block,
            assign_generated_ipv6_cidr_block: false,
            enable_dns_hostnames: true,
            enable_dns_support: true,
            tags,
        })
    }

    pub fn with_ipv6(mut self, enabled: bool) -> Self {
        self.assign_generated_ipv6_cidr_block = enabled;
        self
    }
}

impl Declare for NetworkBoundary {
    fn declare(&self, catalog: &ModuleCatalog) -> Result<Unit> {
        Ok(Unit::new(VPC_UNIT, UnitKind::Vpc, catalog.get(names::VPC)?.clone())
            .attr("context", OutputRef::required(CONTEXT_UNIT, "context"))
            .attr("name", self.name.as_str())
            .attr("ipv4_primary_cidr_block", self.cidr_block.to_string())
            .attr(
                "assign_generated_ipv6_cidr_block",
                self.assign_generated_ipv6_cidr_block,
            )
            .attr("dns_hostnames_enabled", self.enable_dns_hostnames)
            .attr("dns_support_enabled", self.enable_dns_support)
            .attr("tags", self.tags.to_json())
            .force_new("ipv4_primary_cidr_block"))
    }
}
