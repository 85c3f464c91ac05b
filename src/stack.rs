//! Stack variables.
//!
//! A stack file is YAML. Every field has a default except the region and the
//! caller identity, so the smallest useful file names those and a cluster
//! name. `-e key=value` overrides address fields by dotted path
//! (`node_group.scaling.max_size=5`) and are parsed as YAML scalars.

use std::collections::BTreeMap;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value as YamlValue;
use tracing::debug;

use crate::cluster::{AccessConfig, AccessEntry, AddonDescriptor, EncryptionConfig};
use crate::context::{NamingContext, ProviderContext, StackContext};
use crate::error::{Error, Result};
use crate::network::{Ipv4Cidr, DEFAULT_VPC_CIDR};
use crate::nodegroup::{BlockDeviceMapping, CapacityType, ScalingConfig};
use crate::sources::{ModuleCatalog, PinOverride};
use crate::tags::Tags;

/// The applying identity, as a caller-identity lookup would report it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub account_id: String,
    pub arn: String,
}

/// Control plane variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    pub kubernetes_version: String,
    pub enabled_log_types: Vec<String>,
    pub encryption: EncryptionConfig,
    pub access_config: AccessConfig,
    pub access_entries: Vec<AccessEntry>,
    pub endpoint_public_access: bool,
    pub endpoint_private_access: bool,
    pub public_access_cidrs: Vec<Ipv4Cidr>,
    pub allowed_security_group_ids: Vec<String>,
    pub allowed_cidr_blocks: Vec<Ipv4Cidr>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            kubernetes_version: "1.30".to_string(),
            enabled_log_types: vec!["api".into(), "audit".into(), "authenticator".into()],
            encryption: EncryptionConfig::default(),
            access_config: AccessConfig::default(),
            access_entries: Vec::new(),
            endpoint_public_access: true,
            endpoint_private_access: true,
            public_access_cidrs: Vec::new(),
            allowed_security_group_ids: Vec::new(),
            allowed_cidr_blocks: Vec::new(),
        }
    }
}

/// Worker pool variables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeGroupSettings {
    pub instance_types: Vec<String>,
    pub capacity_type: CapacityType,
    pub ami_type: String,
    pub scaling: ScalingConfig,
    pub labels: BTreeMap<String, String>,
    pub block_device_mappings: Vec<BlockDeviceMapping>,
}

impl Default for NodeGroupSettings {
    fn default() -> Self {
        Self {
            instance_types: vec!["t3.large".to_string()],
            capacity_type: CapacityType::OnDemand,
            ami_type: "AL2023_x86_64_STANDARD".to_string(),
            scaling: ScalingConfig::default(),
            labels: BTreeMap::new(),
            block_device_mappings: vec![BlockDeviceMapping::default()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleSettings {
    pub enabled: bool,
}

impl Default for RoleSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Everything a stack file can set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Naming convention
    pub context: NamingContext,
    pub region: Option<String>,
    pub caller: Option<CallerIdentity>,
    pub vpc_cidr: Ipv4Cidr,
    /// Zone names or bare suffixes (`a` expands to `<region>a`)
    pub availability_zones: Vec<String>,
    pub subnets_per_az_count: usize,
    pub nat_gateway_enabled: bool,
    pub ipv6_enabled: bool,
    pub cluster: ClusterSettings,
    pub node_group: NodeGroupSettings,
    pub vpc_cni_role: RoleSettings,
    pub addons: Vec<AddonDescriptor>,
    /// Module pin overrides by module name
    pub modules: IndexMap<String, PinOverride>,
    /// Tags applied to every unit, over the generated ones
    pub tags: Tags,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            context: NamingContext::default(),
            region: None,
            caller: None,
            vpc_cidr: DEFAULT_VPC_CIDR,
            availability_zones: vec!["a".to_string(), "b".to_string()],
            subnets_per_az_count: 2,
            nat_gateway_enabled: true,
            ipv6_enabled: false,
            cluster: ClusterSettings::default(),
            node_group: NodeGroupSettings::default(),
            vpc_cni_role: RoleSettings::default(),
            addons: AddonDescriptor::defaults(),
            modules: IndexMap::new(),
            tags: Tags::new(),
        }
    }
}

impl StackConfig {
    /// Load a stack file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::StackLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            Error::YamlParse(inner) => Error::StackLoad {
                path: path.to_path_buf(),
                message: inner.to_string(),
            },
            other => other,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `key=value` overrides and `@file` override files.
    ///
    /// The stack is round-tripped through YAML so that overrides go through
    /// the same deserialization and defaults as the file itself.
    pub fn apply_overrides(self, overrides: &[String]) -> Result<Self> {
        if overrides.is_empty() {
            return Ok(self);
        }

        let mut tree = serde_yaml::to_value(&self)?;
        for raw in overrides {
            if let Some(file) = raw.strip_prefix('@') {
                let content = std::fs::read_to_string(file).map_err(|e| Error::StackLoad {
                    path: file.into(),
                    message: e.to_string(),
                })?;
                let vars: IndexMap<String, YamlValue> = serde_yaml::from_str(&content)
                    .map_err(|e| Error::InvalidOverride(format!("{}: {}", file, e)))?;
                for (key, value) in vars {
                    set_path(&mut tree, &key, value)?;
                }
                continue;
            }

            let (key, value) = raw
                .split_once('=')
                .ok_or_else(|| Error::InvalidOverride(format!("'{}' is not key=value", raw)))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::InvalidOverride(format!("'{}' has an empty key", raw)));
            }
            let parsed = parse_scalar(value);
            debug!("Override {} = {:?}", key, parsed);
            set_path(&mut tree, key, parsed)?;
        }

        serde_yaml::from_value(tree).map_err(|e| Error::InvalidOverride(e.to_string()))
    }

    /// The naming context with stack-wide tags layered over the context's.
    pub fn naming_context(&self) -> NamingContext {
        let tags = self.context.tags.merge(&self.tags);
        self.context.clone().with_tags(tags)
    }

    pub fn provider_context(&self) -> Result<ProviderContext> {
        let region = self
            .region
            .as_deref()
            .ok_or_else(|| Error::invalid_field("context", "region", "is required"))?;
        let caller = self
            .caller
            .as_ref()
            .ok_or_else(|| Error::invalid_field("context", "caller", "account_id and arn are required"))?;
        Ok(ProviderContext::new(region, &caller.account_id, &caller.arn))
    }

    /// Validated naming and provider context
    pub fn stack_context(&self) -> Result<StackContext> {
        StackContext::new(self.naming_context(), self.provider_context()?)
    }

    /// Default pins with this stack's overrides applied
    pub fn catalog(&self) -> Result<ModuleCatalog> {
        ModuleCatalog::defaults().with_overrides(&self.modules)
    }

    /// A commented starting point written by `init`
    pub fn sample(namespace: &str, name: &str) -> String {
        format!(
            r#"# eksform stack
context:
  namespace: {namespace}
  stage: dev
  name: {name}

region: us-east-2
caller:
  account_id: "123456789012"
  arn: arn:aws:iam::123456789012:role/Admin

vpc_cidr: 10.0.0.0/16
availability_zones: [a, b]
subnets_per_az_count: 2
nat_gateway_enabled: true

cluster:
  kubernetes_version: "1.30"
  access_entries:
    - principal_arn: arn:aws:iam::123456789012:role/Admin
      policy_associations:
        AmazonEKSClusterAdminPolicy:
          type: cluster

node_group:
  instance_types: [t3.large]
  scaling:
    min_size: 1
    desired_size: 2
    max_size: 3

vpc_cni_role:
  enabled: true

tags:
  ManagedBy: eksform
"#
        )
    }
}

/// Parse an override value as a YAML scalar.
///
/// Floats keep their source text: `1.30` is a Kubernetes version, not 1.3,
/// and no stack field is a float.
fn parse_scalar(raw: &str) -> YamlValue {
    match serde_yaml::from_str::<YamlValue>(raw) {
        Ok(YamlValue::Number(n)) if n.is_f64() => YamlValue::String(raw.to_string()),
        Ok(value) => value,
        Err(_) => YamlValue::String(raw.to_string()),
    }
}

/// Set `value` at a dotted path, creating intermediate mappings.
fn set_path(tree: &mut YamlValue, path: &str, value: YamlValue) -> Result<()> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidOverride(format!("'{}' is not a valid path", path)));
    }

    let mut current = tree;
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        let node: &mut YamlValue = current;
        if node.is_null() {
            *node = YamlValue::Mapping(serde_yaml::Mapping::new());
        }

        current = match node {
            YamlValue::Sequence(items) => {
                let index: usize = segment.parse().map_err(|_| {
                    Error::InvalidOverride(format!(
                        "'{}' in '{}' must be a list index",
                        segment, path
                    ))
                })?;
                let len = items.len();
                let slot = items.get_mut(index).ok_or_else(|| {
                    Error::InvalidOverride(format!(
                        "index {} in '{}' is out of range (length {})",
                        index, path, len
                    ))
                })?;
                if last {
                    *slot = value;
                    return Ok(());
                }
                slot
            }
            YamlValue::Mapping(map) => {
                let key = YamlValue::String(segment.to_string());
                if last {
                    map.insert(key, value);
                    return Ok(());
                }
                if !map.contains_key(&key) {
                    map.insert(key.clone(), YamlValue::Mapping(serde_yaml::Mapping::new()));
                }
                map.get_mut(&key).ok_or_else(|| {
                    Error::Internal(format!("override path '{}' vanished", path))
                })?
            }
            _ => {
                return Err(Error::InvalidOverride(format!(
                    "'{}' in '{}' is not a mapping or list",
                    segments[..i].join("."),
                    path
                )))
            }
        };
    }

    Ok(())
}
