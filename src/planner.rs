//! Turns stack variables into unit declarations and their graph.
//!
//! Everything here runs before any provider call: naming, CIDR allocation,
//! sizing and access entry validation all fail fast with configuration
//! errors.

use tracing::{debug, info};

use crate::cluster::{
    AccessEntryMap, AddonDescriptor, ClusterDescriptor, IamRoleDescriptor, VPC_CNI_ROLE_UNIT,
};
use crate::context::StackContext;
use crate::error::Result;
use crate::graph::{Declare, DependencyGraph, OutputRef, UnitId, UnitSet};
use crate::network::{NetworkBoundary, SubnetAllocator, SubnetGroup, SubnetType};
use crate::nodegroup::NodeGroupDescriptor;
use crate::sources::ModuleCatalog;
use crate::stack::StackConfig;

/// Declared units, their graph and plan-time warnings.
#[derive(Debug, Clone)]
pub struct Blueprint {
    pub context: StackContext,
    pub units: UnitSet,
    pub graph: DependencyGraph,
    pub warnings: Vec<String>,
}

impl Blueprint {
    /// Creation order of the declared units
    pub fn creation_order(&self) -> Result<Vec<UnitId>> {
        self.graph.creation_order()
    }
}

pub struct Planner;

impl Planner {
    /// Declare every unit of the stack and build the dependency graph.
    pub fn build(stack: &StackConfig) -> Result<Blueprint> {
        let context = stack.stack_context()?;
        let catalog = stack.catalog()?;
        Self::build_with(stack, context, &catalog)
    }

    /// Same as [`Planner::build`] with an explicit context and catalog.
    pub fn build_with(
        stack: &StackConfig,
        context: StackContext,
        catalog: &ModuleCatalog,
    ) -> Result<Blueprint> {
        let naming = &context.naming;
        let provider = &context.provider;
        let mut units = UnitSet::new();
        let mut warnings = Vec::new();

        units.insert(context.declare(catalog)?)?;

        let cluster_name = naming.id();
        debug!("Planning stack '{}' in {}", cluster_name, provider.region);

        // Network
        let vpc = NetworkBoundary::new(cluster_name.clone(), stack.vpc_cidr, naming.tags())?
            .with_ipv6(stack.ipv6_enabled);
        units.insert(vpc.declare(catalog)?)?;

        let zones: Vec<String> = stack
            .availability_zones
            .iter()
            .map(|z| provider.zone_name(z))
            .collect();
        let allocations =
            SubnetAllocator::new(stack.vpc_cidr, zones, stack.subnets_per_az_count).allocate()?;

        let mut subnet_groups = Vec::new();
        let mut private_groups = Vec::new();
        for allocation in allocations {
            let child = naming.with_attributes([allocation.subnet_type.as_str(), allocation.zone.as_str()]);
            let group = SubnetGroup::from_allocation(
                child.id(),
                allocation,
                &cluster_name,
                stack.nat_gateway_enabled,
                &child.tags(),
            );
            let unit = group.declare(catalog)?;
            if group.subnet_type == SubnetType::Private {
                private_groups.push(unit.id.clone());
            }
            subnet_groups.push(unit.id.clone());
            units.insert(unit)?;
        }

        // Control plane
        let settings = &stack.cluster;
        let mut cluster = ClusterDescriptor::new(cluster_name.clone(), &settings.kubernetes_version);
        cluster.subnet_groups = subnet_groups;
        cluster.enabled_log_types = settings.enabled_log_types.clone();
        cluster.encryption = settings.encryption.clone();
        cluster.access_config = settings.access_config.clone();
        cluster.access_entries =
            AccessEntryMap::from_entries(settings.access_entries.clone(), &provider.partition)?;
        cluster.endpoint_public_access = settings.endpoint_public_access;
        cluster.endpoint_private_access = settings.endpoint_private_access;
        cluster.public_access_cidrs = settings.public_access_cidrs.clone();
        cluster.allowed_security_group_ids = settings.allowed_security_group_ids.clone();
        cluster.allowed_cidr_blocks = settings.allowed_cidr_blocks.clone();
        cluster.ipv6 = stack.ipv6_enabled;
        cluster.tags = naming.tags();

        cluster.validate()?;
        warnings.extend(cluster.validate_access(provider)?);
        units.insert(cluster.declare(catalog)?)?;

        // IRSA role for the VPC CNI
        if stack.vpc_cni_role.enabled {
            let child = naming.with_attributes(["vpc-cni"]);
            let role = IamRoleDescriptor::vpc_cni(child.id(), provider, stack.ipv6_enabled, child.tags());
            role.validate()?;
            units.insert(role.declare(catalog)?)?;
        }

        // Workers
        let pool = &stack.node_group;
        let child = naming.with_attributes(["workers"]);
        let mut node_group = NodeGroupDescriptor::new(
            child.id(),
            private_groups,
            pool.instance_types.clone(),
            pool.scaling,
        )?;
        node_group.capacity_type = pool.capacity_type;
        node_group.ami_type = pool.ami_type.clone();
        node_group.labels = pool.labels.clone();
        node_group.block_device_mappings = pool.block_device_mappings.clone();
        node_group.tags = child.tags();
        units.insert(node_group.declare(catalog)?)?;

        // Add-ons
        for addon in &stack.addons {
            let addon = Self::bind_addon(addon);
            units.insert(addon.declare(catalog)?)?;
        }

        let graph = DependencyGraph::build(&units)?;
        info!(
            "Planned {} units with {} dependencies",
            graph.node_count(),
            graph.edge_count()
        );

        Ok(Blueprint {
            context,
            units,
            graph,
            warnings,
        })
    }

    /// The VPC CNI add-on always reads the role ARN optionally; the edge
    /// only exists when the role unit is declared.
    fn bind_addon(addon: &AddonDescriptor) -> AddonDescriptor {
        let mut addon = addon.clone();
        if addon.name == "vpc-cni" && addon.service_account_role.is_none() {
            addon.service_account_role = Some(OutputRef::optional(VPC_CNI_ROLE_UNIT, "role_arn"));
        }
        addon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn stack() -> StackConfig {
        StackConfig::from_yaml_str(
            r#"
context:
  namespace: acme
  stage: prod
  name: eks
region: us-east-2
caller:
  account_id: "123456789012"
  arn: arn:aws:iam::123456789012:role/Admin
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_context_comes_first() {
        let blueprint = Planner::build(&stack()).unwrap();
        let order = blueprint.creation_order().unwrap();
        assert_eq!(order[0], "context");
        assert_eq!(order[1], "vpc");
    }

    #[test]
    fn test_vpc_cni_binding_is_added_to_listed_addon() {
        let mut s = stack();
        s.addons = vec![AddonDescriptor::new("vpc-cni")];
        let blueprint = Planner::build(&s).unwrap();
        assert!(blueprint
            .graph
            .direct_dependencies("addon.vpc-cni")
            .contains(&VPC_CNI_ROLE_UNIT.to_string()));
    }

    #[test]
    fn test_duplicate_addon_rejected() {
        let mut s = stack();
        s.addons = vec![AddonDescriptor::new("coredns"), AddonDescriptor::new("coredns")];
        assert!(matches!(
            Planner::build(&s),
            Err(Error::DuplicateUnit(id)) if id == "addon.coredns"
        ));
    }

    #[test]
    fn test_subnet_names_carry_type_and_zone() {
        let blueprint = Planner::build(&stack()).unwrap();
        let unit = blueprint.units.get("subnets.private.us-east-2a").unwrap();
        assert_eq!(
            unit.declared()["name"],
            serde_json::json!("acme-prod-eks-private-us-east-2a")
        );
        assert_eq!(
            unit.declared()["tags"]["kubernetes.io/cluster/acme-prod-eks"],
            serde_json::json!("shared")
        );
    }
}
