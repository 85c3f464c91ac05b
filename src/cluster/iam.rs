//! IAM roles for service accounts (IRSA).

use serde::{Deserialize, Serialize};

use super::CLUSTER_UNIT;
use crate::context::ProviderContext;
use crate::error::{Error, Result};
use crate::graph::{Declare, OutputRef, Unit, UnitKind};
use crate::sources::{names, ModuleCatalog};
use crate::tags::Tags;

pub const VPC_CNI_ROLE_UNIT: &str = "iam.vpc_cni_role";

/// A role assumable by Kubernetes service accounts through the cluster's
/// OIDC provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IamRoleDescriptor {
    pub unit_id: String,
    pub role_name: String,
    /// `namespace:service-account` pairs allowed to assume the role
    pub service_account_subjects: Vec<String>,
    pub policy_arns: Vec<String>,
    pub tags: Tags,
}

impl IamRoleDescriptor {
    /// Role for the `aws-node` daemonset of the VPC CNI add-on.
    pub fn vpc_cni(
        role_name: impl Into<String>,
        provider: &ProviderContext,
        ipv6: bool,
        tags: Tags,
    ) -> Self {
        let mut policy_arns = vec![provider.managed_policy_arn("AmazonEKS_CNI_Policy")];
        if ipv6 {
            policy_arns.push(provider.iam_arn("policy/AmazonEKS_CNI_IPv6_Policy"));
        }
        Self {
            unit_id: VPC_CNI_ROLE_UNIT.to_string(),
            role_name: role_name.into(),
            service_account_subjects: vec!["kube-system:aws-node".to_string()],
            policy_arns,
            tags,
        }
    }

    pub fn validate(&self) -> Result<()> {
        // IAM role names are limited to 64 characters
        if self.role_name.is_empty() || self.role_name.len() > 64 {
            return Err(Error::invalid_field(
                &self.unit_id,
                "role_name",
                "must be between 1 and 64 characters",
            ));
        }
        for subject in &self.service_account_subjects {
            if subject.split_once(':').map_or(true, |(ns, sa)| ns.is_empty() || sa.is_empty()) {
                return Err(Error::invalid_field(
                    &self.unit_id,
                    "service_account_subjects",
                    format!("'{}' must look like namespace:service-account", subject),
                ));
            }
        }
        Ok(())
    }
}

impl Declare for IamRoleDescriptor {
    fn declare(&self, catalog: &ModuleCatalog) -> Result<Unit> {
        self.validate()?;
        Ok(Unit::new(
            self.unit_id.as_str(),
            UnitKind::IamRole,
            catalog.get(names::IAM_ROLE)?.clone(),
        )
        .attr("role_name", self.role_name.as_str())
        .attr(
            "oidc_provider_arn",
            OutputRef::required(CLUSTER_UNIT, "oidc_provider_arn"),
        )
        .attr(
            "namespace_service_accounts",
            serde_json::to_value(&self.service_account_subjects)?,
        )
        .attr("role_policy_arns", serde_json::to_value(&self.policy_arns)?)
        .attr("tags", self.tags.to_json()))
    }
}
