//! Network units: the VPC boundary and per-zone subnet groups.

pub mod cidr;
pub mod subnets;
pub mod vpc;

pub use cidr::{Ipv4Cidr, DEFAULT_VPC_CIDR, MIN_SUBNET_PREFIX};
pub use subnets::{discovery_tags, SubnetAllocation, SubnetAllocator, SubnetGroup, SubnetType};
pub use vpc::NetworkBoundary;
