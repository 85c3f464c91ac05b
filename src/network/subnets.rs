//! Subnet groups and CIDR allocation.
//!
//! The VPC block is split into a public half and a private half. Each half is
//! divided into `zones * subnets_per_az` equal blocks (rounded up to a power
//! of two) and handed out zone by zone, in address order.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cidr::{Ipv4Cidr, MIN_SUBNET_PREFIX};
use super::vpc::VPC_UNIT;
use crate::error::{Error, Result};
use crate::graph::{Declare, OutputRef, Timeouts, Unit, UnitId, UnitKind};
use crate::sources::{names, ModuleCatalog};
use crate::tags::Tags;

/// Public or private subnet tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetType {
    Public,
    Private,
}

impl SubnetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubnetType::Public => "public",
            SubnetType::Private => "private",
        }
    }

    /// Load-balancer role tag key for this tier
    pub fn elb_role_tag(&self) -> &'static str {
        match self {
            SubnetType::Public => "kubernetes.io/role/elb",
            SubnetType::Private => "kubernetes.io/role/internal-elb",
        }
    }

    /// Unit id of the group for a zone
    pub fn unit_id(&self, zone: &str) -> UnitId {
        format!("subnets.{}.{}", self.as_str(), zone)
    }
}

impl fmt::Display for SubnetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tags that let the cluster and its load balancer controller find a subnet.
pub fn discovery_tags(cluster_name: &str, subnet_type: SubnetType) -> Tags {
    Tags::new()
        .with(subnet_type.elb_role_tag(), "1")
        .with(format!("kubernetes.io/cluster/{}", cluster_name), "shared")
}

/// CIDR blocks assigned to one (zone, tier) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetAllocation {
    pub zone: String,
    pub subnet_type: SubnetType,
    pub cidr_blocks: Vec<Ipv4Cidr>,
}

/// Splits a VPC block into per-zone subnet blocks.
#[derive(Debug, Clone)]
pub struct SubnetAllocator {
    vpc_cidr: Ipv4Cidr,
    zones: Vec<String>,
    subnets_per_az: usize,
}

impl SubnetAllocator {
    pub fn new(vpc_cidr: Ipv4Cidr, zones: Vec<String>, subnets_per_az: usize) -> Self {
        Self {
            vpc_cidr,
            zones,
            subnets_per_az,
        }
    }

    /// Allocate blocks for every zone, public groups first.
    pub fn allocate(&self) -> Result<Vec<SubnetAllocation>> {
        if self.zones.is_empty() {
            return Err(Error::invalid_field(
                "subnets",
                "availability_zones",
                "at least one availability zone is required",
            ));
        }
        if self.subnets_per_az == 0 {
            return Err(Error::invalid_field(
                "subnets",
                "subnets_per_az_count",
                "must be at least 1",
            ));
        }
        for (i, zone) in self.zones.iter().enumerate() {
            if self.zones[..i].contains(zone) {
                return Err(Error::invalid_field(
                    "subnets",
                    "availability_zones",
                    format!("zone '{}' listed more than once", zone),
                ));
            }
        }

        let halves = self.vpc_cidr.subdivide(1)?;
        let half_prefix = halves[0].prefix_len();
        if half_prefix > MIN_SUBNET_PREFIX {
            return Err(Error::invalid_cidr(
                self.vpc_cidr.to_string(),
                format!(
                    "too small to split into public and private /{} subnets",
                    MIN_SUBNET_PREFIX
                ),
            ));
        }

        // Smallest-subnet capacity of one tier
        let capacity = 1usize << (MIN_SUBNET_PREFIX - half_prefix);
        if self.subnets_per_az > capacity {
            return Err(Error::invalid_field(
                "subnets",
                "subnets_per_az_count",
                format!(
                    "{} exceeds the {} /{} subnets a tier of {} can hold",
                    self.subnets_per_az, capacity, MIN_SUBNET_PREFIX, self.vpc_cidr
                ),
            ));
        }
        let count = self
            .zones
            .len()
            .checked_mul(self.subnets_per_az)
            .ok_or_else(|| {
                Error::invalid_field(
                    "subnets",
                    "subnets_per_az_count",
                    "subnet count per tier overflows",
                )
            })?;

        let bits = Ipv4Cidr::bits_for(count);
        let child_prefix = half_prefix as u32 + bits as u32;
        if child_prefix > MIN_SUBNET_PREFIX as u32 {
            return Err(Error::invalid_cidr(
                self.vpc_cidr.to_string(),
                format!(
                    "too small for {} subnets per tier: blocks would be /{}, smallest allowed is /{}",
                    count, child_prefix, MIN_SUBNET_PREFIX
                ),
            ));
        }

        let mut allocations = Vec::with_capacity(self.zones.len() * 2);
        for (half, subnet_type) in halves.iter().zip([SubnetType::Public, SubnetType::Private]) {
            for (zone_index, zone) in self.zones.iter().enumerate() {
                let cidr_blocks = (0..self.subnets_per_az)
                    .map(|j| half.nth_subnet(bits, (zone_index * self.subnets_per_az + j) as u32))
                    .collect::<Result<Vec<_>>>()?;
                allocations.push(SubnetAllocation {
                    zone: zone.clone(),
                    subnet_type,
                    cidr_blocks,
                });
            }
        }
        Ok(allocations)
    }
}

/// One subnet group unit: all subnets of one tier in one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetGroup {
    pub name: String,
    pub availability_zone: String,
    pub subnet_type: SubnetType,
    pub cidr_blocks: Vec<Ipv4Cidr>,
    /// Public groups: create a NAT gateway. Private groups: route through it.
    pub nat_gateway_enabled: bool,
    pub map_public_ip_on_launch: bool,
    pub tags: Tags,
    #[serde(skip)]
    pub route_update_timeout: Option<Duration>,
}

impl SubnetGroup {
    /// Build a group from an allocation. Discovery tags are merged over the
    /// supplied tags so they cannot be dropped.
    pub fn from_allocation(
        name: impl Into<String>,
        allocation: SubnetAllocation,
        cluster_name: &str,
        nat_gateway_enabled: bool,
        tags: &Tags,
    ) -> Self {
        let required = discovery_tags(cluster_name, allocation.subnet_type);
        Self {
            name: name.into(),
            map_public_ip_on_launch: allocation.subnet_type == SubnetType::Public,
            availability_zone: allocation.zone,
            subnet_type: allocation.subnet_type,
            cidr_blocks: allocation.cidr_blocks,
            nat_gateway_enabled,
            tags: Tags::merge_all([tags, &required]),
            route_update_timeout: None,
        }
    }

    pub fn unit_id(&self) -> UnitId {
        self.subnet_type.unit_id(&self.availability_zone)
    }

    /// Route target of the group's default route
    fn gateway(&self) -> (&'static str, Option<OutputRef>) {
        match self.subnet_type {
            SubnetType::Public => ("igw_id", Some(OutputRef::required(VPC_UNIT, "igw_id"))),
            SubnetType::Private if self.nat_gateway_enabled => (
                "nat_gateway_id",
                Some(OutputRef::required(
                    SubnetType::Public.unit_id(&self.availability_zone),
                    "nat_gateway_id",
                )),
            ),
            SubnetType::Private => ("nat_gateway_id", None),
        }
    }
}

impl Declare for SubnetGroup {
    fn declare(&self, catalog: &ModuleCatalog) -> Result<Unit> {
        let timeouts = Timeouts::routes(
            self.route_update_timeout
                .unwrap_or_else(|| Timeouts::default().update),
        );

        let mut unit = Unit::new(
            self.unit_id(),
            UnitKind::SubnetGroup,
            catalog.get(names::SUBNETS)?.clone(),
        )
        .attr("name", self.name.as_str())
        .attr("vpc_id", OutputRef::required(VPC_UNIT, "vpc_id"))
        .attr("availability_zone", self.availability_zone.as_str())
        .attr("type", self.subnet_type.as_str())
        .attr(
            "cidr_blocks",
            Value::Array(
                self.cidr_blocks
                    .iter()
                    .map(|c| Value::String(c.to_string()))
                    .collect(),
            ),
        )
        .attr("map_public_ip_on_launch", self.map_public_ip_on_launch)
        .attr("tags", self.tags.to_json())
        .timeouts(timeouts)
        .force_new("cidr_blocks")
        .force_new("availability_zone");

        let (gateway_field, reference) = self.gateway();
        unit = match reference {
            Some(r) => unit.attr(gateway_field, r),
            None => unit.attr(gateway_field, Value::Null),
        };
        if self.subnet_type == SubnetType::Public {
            unit = unit.attr("nat_gateway_enabled", self.nat_gateway_enabled);
        }

        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(cidr: &str, zones: &[&str], per_az: usize) -> SubnetAllocator {
        SubnetAllocator::new(
            cidr.parse().unwrap(),
            zones.iter().map(|z| z.to_string()).collect(),
            per_az,
        )
    }

    #[test]
    fn test_allocation_shape() {
        let allocs = allocator("10.0.0.0/16", &["us-east-2a", "us-east-2b"], 2)
            .allocate()
            .unwrap();
        assert_eq!(allocs.len(), 4);

        let public_a = &allocs[0];
        assert_eq!(public_a.subnet_type, SubnetType::Public);
        assert_eq!(public_a.zone, "us-east-2a");
        assert_eq!(
            public_a.cidr_blocks.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            vec!["10.0.0.0/19", "10.0.32.0/19"]
        );

        let private_b = &allocs[3];
        assert_eq!(private_b.subnet_type, SubnetType::Private);
        assert_eq!(
            private_b.cidr_blocks.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
            vec!["10.0.192.0/19", "10.0.224.0/19"]
        );
    }

    #[test]
    fn test_allocations_do_not_overlap() {
        let allocs = allocator("10.20.0.0/20", &["a", "b", "c"], 3).allocate().unwrap();
        let blocks: Vec<Ipv4Cidr> = allocs.into_iter().flat_map(|a| a.cidr_blocks).collect();
        assert_eq!(blocks.len(), 18);
        for (i, a) in blocks.iter().enumerate() {
            for b in &blocks[i + 1..] {
                assert!(!a.overlaps(b), "{} overlaps {}", a, b);
            }
        }
    }

    #[test]
    fn test_absurd_subnet_count_is_rejected() {
        let err = allocator("10.0.0.0/16", &["a", "b"], usize::MAX).allocate().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidField { ref field, .. } if field == "subnets_per_az_count"
        ));

        // A /16 tier holds 2048 /28 blocks
        assert!(allocator("10.0.0.0/16", &["a"], 2049).allocate().is_err());
        assert!(allocator("10.0.0.0/16", &["a"], 2048).allocate().is_ok());
    }

    #[test]
    fn test_too_small_vpc() {
        let err = allocator("10.0.0.0/24", &["a", "b", "c"], 4).allocate().unwrap_err();
        assert!(matches!(err, Error::InvalidCidr { .. }));
    }

    #[test]
    fn test_duplicate_zone_rejected() {
        assert!(allocator("10.0.0.0/16", &["a", "a"], 1).allocate().is_err());
    }

    #[test]
    fn test_discovery_tags_always_present() {
        let alloc = SubnetAllocation {
            zone: "us-east-2a".into(),
            subnet_type: SubnetType::Private,
            cidr_blocks: vec!["10.0.128.0/19".parse().unwrap()],
        };
        let user = Tags::new()
            .with("kubernetes.io/role/internal-elb", "0")
            .with("Team", "platform");
        let group = SubnetGroup::from_allocation("acme-eks-private", alloc, "acme-eks", true, &user);
        assert_eq!(group.tags.get("kubernetes.io/role/internal-elb"), Some("1"));
        assert_eq!(group.tags.get("kubernetes.io/cluster/acme-eks"), Some("shared"));
        assert_eq!(group.tags.get("Team"), Some("platform"));
        assert!(!group.map_public_ip_on_launch);
    }

    #[test]
    fn test_private_group_routes_through_zone_nat() {
        let alloc = SubnetAllocation {
            zone: "us-east-2b".into(),
            subnet_type: SubnetType::Private,
            cidr_blocks: vec!["10.0.160.0/19".parse().unwrap()],
        };
        let group = SubnetGroup::from_allocation("n", alloc, "c", true, &Tags::new());
        let unit = group.declare(&ModuleCatalog::defaults()).unwrap();

        assert_eq!(unit.id, "subnets.private.us-east-2b");
        let targets: Vec<&str> = unit.references().iter().map(|(_, r)| r.unit.as_str()).collect();
        assert_eq!(targets, vec!["vpc", "subnets.public.us-east-2b"]);
        assert_eq!(unit.timeouts.create, Duration::from_secs(300));
        assert_eq!(unit.timeouts.delete, Duration::from_secs(600));
    }

    #[test]
    fn test_private_group_without_nat_has_no_gateway_edge() {
        let alloc = SubnetAllocation {
            zone: "a".into(),
            subnet_type: SubnetType::Private,
            cidr_blocks: vec!["10.0.128.0/19".parse().unwrap()],
        };
        let group = SubnetGroup::from_allocation("n", alloc, "c", false, &Tags::new());
        let unit = group.declare(&ModuleCatalog::defaults()).unwrap();
        assert_eq!(unit.references().len(), 1);
        assert_eq!(unit.declared()["nat_gateway_id"], Value::Null);
    }
}
