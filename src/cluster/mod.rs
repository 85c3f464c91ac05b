//! The EKS control plane and its satellites.
//!
//! - [`ClusterDescriptor`]: control plane, encryption, logging, endpoint
//!   access and the access entry map
//! - [`access`]: access entry validation and reconciliation
//! - [`addons`]: one unit per managed add-on
//! - [`iam`]: the optional IRSA role feeding the VPC CNI add-on

pub mod access;
pub mod addons;
pub mod iam;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::context::ProviderContext;
use crate::error::{Error, Result};
use crate::graph::{AttrValue, Declare, OutputRef, Unit, UnitId, UnitKind};
use crate::network::vpc::VPC_UNIT;
use crate::network::Ipv4Cidr;
use crate::sources::{names, ModuleCatalog};
use crate::tags::Tags;

pub use access::{
    reconcile, AccessChangeSet, AccessEntry, AccessEntryMap, AccessScope, PolicyAssociation,
};
pub use addons::{AddonDescriptor, ConflictResolution};
pub use iam::{IamRoleDescriptor, VPC_CNI_ROLE_UNIT};

pub const CLUSTER_UNIT: &str = "cluster";

static KUBERNETES_VERSION_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^1\.\d{2}$").expect("Invalid Kubernetes version regex"));

static CLUSTER_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Za-z][A-Za-z0-9\-_]{0,99}$").expect("Invalid cluster name regex")
});

/// Control plane log types accepted by EKS
pub const LOG_TYPES: &[&str] = &["api", "audit", "authenticator", "controllerManager", "scheduler"];

/// How the cluster authenticates IAM principals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticationMode {
    Api,
    #[default]
    ApiAndConfigMap,
    ConfigMap,
}

impl AuthenticationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticationMode::Api => "API",
            AuthenticationMode::ApiAndConfigMap => "API_AND_CONFIG_MAP",
            AuthenticationMode::ConfigMap => "CONFIG_MAP",
        }
    }

    /// Whether access entries are honoured
    pub fn supports_access_entries(&self) -> bool {
        !matches!(self, AuthenticationMode::ConfigMap)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub authentication_mode: AuthenticationMode,
    pub bootstrap_cluster_creator_admin_permissions: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            authentication_mode: AuthenticationMode::ApiAndConfigMap,
            bootstrap_cluster_creator_admin_permissions: true,
        }
    }
}

/// Envelope encryption of Kubernetes resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub resources: Vec<String>,
    /// Customer managed key; a key is created by the module when unset
    pub kms_key_arn: Option<String>,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            resources: vec!["secrets".to_string()],
            kms_key_arn: None,
        }
    }
}

/// The cluster control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescriptor {
    pub name: String,
    pub kubernetes_version: String,
    pub subnet_groups: Vec<UnitId>,
    pub enabled_log_types: Vec<String>,
    pub encryption: EncryptionConfig,
    pub access_config: AccessConfig,
    pub access_entries: AccessEntryMap,
    pub endpoint_public_access: bool,
    pub endpoint_private_access: bool,
    pub public_access_cidrs: Vec<Ipv4Cidr>,
    pub allowed_security_group_ids: Vec<String>,
    pub allowed_cidr_blocks: Vec<Ipv4Cidr>,
    pub ipv6: bool,
    pub tags: Tags,
}

impl ClusterDescriptor {
    pub fn new(name: impl Into<String>, kubernetes_version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kubernetes_version: kubernetes_version.into(),
            subnet_groups: Vec::new(),
            enabled_log_types: vec!["api".into(), "audit".into(), "authenticator".into()],
            encryption: EncryptionConfig::default(),
            access_config: AccessConfig::default(),
            access_entries: AccessEntryMap::new(),
            endpoint_public_access: true,
            endpoint_private_access: true,
            public_access_cidrs: Vec::new(),
            allowed_security_group_ids: Vec::new(),
            allowed_cidr_blocks: Vec::new(),
            ipv6: false,
            tags: Tags::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !CLUSTER_NAME_REGEX.is_match(&self.name) {
            return Err(Error::invalid_field(
                CLUSTER_UNIT,
                "cluster_name",
                format!("'{}' is not a valid cluster name", self.name),
            ));
        }
        if !KUBERNETES_VERSION_REGEX.is_match(&self.kubernetes_version) {
            return Err(Error::invalid_field(
                CLUSTER_UNIT,
                "kubernetes_version",
                format!("'{}' must look like 1.30", self.kubernetes_version),
            ));
        }
        if self.subnet_groups.is_empty() {
            return Err(Error::invalid_field(
                CLUSTER_UNIT,
                "subnet_ids",
                "the control plane needs at least one subnet group",
            ));
        }
        for log_type in &self.enabled_log_types {
            if !LOG_TYPES.contains(&log_type.as_str()) {
                return Err(Error::invalid_field(
                    CLUSTER_UNIT,
                    "enabled_log_types",
                    format!("unknown log type '{}'; expected one of {}", log_type, LOG_TYPES.join(", ")),
                ));
            }
        }
        if !self.endpoint_public_access && !self.endpoint_private_access {
            return Err(Error::invalid_field(
                CLUSTER_UNIT,
                "endpoint_access",
                "at least one of public or private endpoint access must be enabled",
            ));
        }
        if !self.access_config.authentication_mode.supports_access_entries()
            && !self.access_entries.is_empty()
        {
            return Err(Error::invalid_field(
                CLUSTER_UNIT,
                "access_entries",
                "access entries require authentication mode API or API_AND_CONFIG_MAP",
            ));
        }
        Ok(())
    }

    /// Lockout check against the applying identity. Returns plan warnings.
    pub fn validate_access(&self, provider: &ProviderContext) -> Result<Vec<String>> {
        if !self.access_config.authentication_mode.supports_access_entries() {
            return Ok(vec![format!(
                "cluster '{}' uses CONFIG_MAP authentication; access entries are not validated",
                self.name
            )]);
        }
        self.access_entries.validate(
            &self.name,
            &provider.issuer_arn(),
            self.access_config.bootstrap_cluster_creator_admin_permissions,
            &provider.partition,
        )
    }

    fn cidr_list(cidrs: &[Ipv4Cidr]) -> Value {
        Value::Array(cidrs.iter().map(|c| Value::String(c.to_string())).collect())
    }
}

impl Declare for ClusterDescriptor {
    fn declare(&self, catalog: &ModuleCatalog) -> Result<Unit> {
        self.validate()?;

        let subnet_ids = AttrValue::Concat(
            self.subnet_groups
                .iter()
                .map(|group| OutputRef::required(group.as_str(), "subnet_ids").into())
                .collect(),
        );

        let public_cidrs = if self.public_access_cidrs.is_empty() {
            json!(["0.0.0.0/0"])
        } else {
            Self::cidr_list(&self.public_access_cidrs)
        };

        Ok(Unit::new(CLUSTER_UNIT, UnitKind::Cluster, catalog.get(names::CLUSTER)?.clone())
            .attr("cluster_name", self.name.as_str())
            .attr("cluster_version", self.kubernetes_version.as_str())
            .attr("vpc_id", OutputRef::required(VPC_UNIT, "vpc_id"))
            .attr("subnet_ids", subnet_ids)
            .attr(
                "cluster_enabled_log_types",
                serde_json::to_value(&self.enabled_log_types)?,
            )
            .attr(
                "cluster_encryption_config",
                json!({
                    "resources": self.encryption.resources,
                    "provider_key_arn": self.encryption.kms_key_arn,
                }),
            )
            .attr(
                "authentication_mode",
                self.access_config.authentication_mode.as_str(),
            )
            .attr(
                "enable_cluster_creator_admin_permissions",
                self.access_config.bootstrap_cluster_creator_admin_permissions,
            )
            .attr("access_entries", AttrValue::from_serialize(&self.access_entries))
            .attr("cluster_endpoint_public_access", self.endpoint_public_access)
            .attr("cluster_endpoint_private_access", self.endpoint_private_access)
            .attr("cluster_endpoint_public_access_cidrs", public_cidrs)
            .attr(
                "cluster_additional_security_group_ids",
                serde_json::to_value(&self.allowed_security_group_ids)?,
            )
            .attr(
                "cluster_security_group_allowed_cidr_blocks",
                Self::cidr_list(&self.allowed_cidr_blocks),
            )
            .attr("cluster_ip_family", if self.ipv6 { "ipv6" } else { "ipv4" })
            .attr("tags", self.tags.to_json())
            .force_new("cluster_name")
            .force_new("cluster_ip_family"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterDescriptor {
        let mut c = ClusterDescriptor::new("acme-prod-eks", "1.30");
        c.subnet_groups = vec![
            "subnets.public.us-east-2a".into(),
            "subnets.private.us-east-2a".into(),
        ];
        c
    }

    #[test]
    fn test_declare_references_every_subnet_group() {
        let unit = cluster().declare(&ModuleCatalog::defaults()).unwrap();
        let targets: Vec<&str> = unit
            .references()
            .into_iter()
            .filter(|(field, _)| *field == "subnet_ids")
            .map(|(_, r)| r.unit.as_str())
            .collect();
        assert_eq!(
            targets,
            vec!["subnets.public.us-east-2a", "subnets.private.us-east-2a"]
        );
        assert_eq!(
            unit.declared()["cluster_endpoint_public_access_cidrs"],
            json!(["0.0.0.0/0"])
        );
    }

    #[test]
    fn test_invalid_version() {
        let mut c = cluster();
        c.kubernetes_version = "latest".into();
        assert!(matches!(
            c.validate(),
            Err(Error::InvalidField { ref field, .. }) if field == "kubernetes_version"
        ));
    }

    #[test]
    fn test_unknown_log_type() {
        let mut c = cluster();
        c.enabled_log_types.push("kubelet".into());
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_config_map_mode_rejects_access_entries() {
        let mut c = cluster();
        c.access_config.authentication_mode = AuthenticationMode::ConfigMap;
        c.access_entries = AccessEntryMap::from_entries(
            vec![AccessEntry::new("arn:aws:iam::123456789012:role/Admin")],
            "aws",
        )
        .unwrap();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_access_uses_issuer_role() {
        let mut c = cluster();
        c.access_entries = AccessEntryMap::from_entries(
            vec![AccessEntry::new("arn:aws:iam::123456789012:role/Admin")
                .with_policy("AmazonEKSClusterAdminPolicy", AccessScope::Cluster)],
            "aws",
        )
        .unwrap();
        let provider = ProviderContext::new(
            "us-east-2",
            "123456789012",
            "arn:aws:sts::123456789012:assumed-role/Admin/session",
        );
        assert!(c.validate_access(&provider).unwrap().is_empty());
    }
}
