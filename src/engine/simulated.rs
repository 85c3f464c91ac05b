//! In-process provider with deterministic outputs.
//!
//! Identifiers are derived from a hash of the account, region and unit id, so
//! the same stack always yields the same ids. Calls are recorded, and faults
//! or latency can be injected per unit and operation for tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use super::provider::{Operation, Provider, ProviderError, ProviderResult, ResolvedUnit};
use crate::context::ProviderContext;
use crate::graph::{OutputMap, UnitId, UnitKind};
use crate::state::UnitRecord;

/// Service CIDR EKS assigns when none is configured
const DEFAULT_SERVICE_CIDR: &str = "172.20.0.0/16";
const DEFAULT_SERVICE_CIDR_V6: &str = "fd00:ec2::/108";

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCall {
    pub operation: Operation,
    pub unit: UnitId,
}

/// An injected failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail transiently this many times, then succeed
    Transient(u32),
    /// Fail every call
    Fatal(String),
    /// Never return; only a timeout ends the call
    Hang,
}

/// Deterministic local provider.
#[derive(Debug)]
pub struct SimulatedProvider {
    context: ProviderContext,
    latency: Duration,
    calls: Mutex<Vec<ProviderCall>>,
    faults: Mutex<HashMap<(UnitId, Operation), Fault>>,
}

impl SimulatedProvider {
    pub fn new(context: ProviderContext) -> Self {
        Self {
            context,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            faults: Mutex::new(HashMap::new()),
        }
    }

    /// Sleep this long inside every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Inject a fault for one unit and operation
    pub fn inject(&self, unit: impl Into<UnitId>, operation: Operation, fault: Fault) {
        self.faults.lock().insert((unit.into(), operation), fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().clear();
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }

    /// Units touched by one operation, in call order
    pub fn units_for(&self, operation: Operation) -> Vec<UnitId> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .map(|c| c.unit.clone())
            .collect()
    }

    async fn enter(&self, unit: &str, operation: Operation) -> ProviderResult<()> {
        self.calls.lock().push(ProviderCall {
            operation,
            unit: unit.to_string(),
        });
        trace!("Simulated {} of '{}'", operation, unit);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let fault = {
            let mut faults = self.faults.lock();
            let key = (unit.to_string(), operation);
            match faults.get_mut(&key) {
                Some(Fault::Transient(remaining)) => {
                    if *remaining == 0 {
                        faults.remove(&key);
                        None
                    } else {
                        *remaining -= 1;
                        Some(Fault::Transient(*remaining))
                    }
                }
                Some(other) => Some(other.clone()),
                None => None,
            }
        };

        match fault {
            None => Ok(()),
            Some(Fault::Transient(_)) => Err(ProviderError::Transient(format!(
                "throttled while trying to {} {}",
                operation, unit
            ))),
            Some(Fault::Fatal(message)) => Err(ProviderError::Fatal(message)),
            Some(Fault::Hang) => {
                futures::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    /// Short stable hex id for a unit and a salt
    fn short_id(&self, unit: &str, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.context.account_id.as_bytes());
        hasher.update(self.context.region.as_bytes());
        hasher.update(unit.as_bytes());
        hasher.update(salt.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..17].to_string()
    }

    fn outputs(&self, unit: &ResolvedUnit) -> OutputMap {
        let id = unit.id.as_str();
        let value = match unit.kind {
            UnitKind::Context => Value::Object(unit.attributes.clone()),
            UnitKind::Vpc => {
                let vpc_id = format!("vpc-{}", self.short_id(id, "vpc"));
                let ipv6 = unit
                    .attributes
                    .get("assign_generated_ipv6_cidr_block")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                json!({
                    "vpc_id": vpc_id,
                    "vpc_arn": self.context.arn("ec2", &format!("vpc/{}", vpc_id)),
                    "vpc_cidr_block": unit.attributes.get("ipv4_primary_cidr_block"),
                    "vpc_ipv6_cidr_block": if ipv6 { json!("2600:1f14:abc:de00::/56") } else { Value::Null },
                    "igw_id": format!("igw-{}", self.short_id(id, "igw")),
                    "default_security_group_id": format!("sg-{}", self.short_id(id, "sg")),
                })
            }
            UnitKind::SubnetGroup => {
                let cidrs: Vec<&str> = unit
                    .attributes
                    .get("cidr_blocks")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                let subnet_ids: Vec<String> = cidrs
                    .iter()
                    .map(|cidr| format!("subnet-{}", self.short_id(id, cidr)))
                    .collect();
                let nat = unit.attr_str("type") == Some("public")
                    && unit
                        .attributes
                        .get("nat_gateway_enabled")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                json!({
                    "subnet_ids": subnet_ids,
                    "subnet_cidrs": cidrs,
                    "route_table_id": format!("rtb-{}", self.short_id(id, "rtb")),
                    "nat_gateway_id": if nat { json!(format!("nat-{}", self.short_id(id, "nat"))) } else { Value::Null },
                    "availability_zone": unit.attributes.get("availability_zone"),
                })
            }
            UnitKind::Cluster => {
                let name = unit.attr_str("cluster_name").unwrap_or(id);
                let issuer = self.short_id(id, "oidc").to_uppercase();
                let oidc_host = format!("oidc.eks.{}.amazonaws.com/id/{}", self.context.region, issuer);
                let ipv6 = unit.attr_str("cluster_ip_family") == Some("ipv6");
                json!({
                    "cluster_name": name,
                    "cluster_id": name,
                    "cluster_arn": self.context.arn("eks", &format!("cluster/{}", name)),
                    "cluster_endpoint": format!("https://{}.gr7.{}.eks.amazonaws.com", issuer, self.context.region),
                    "cluster_version": unit.attributes.get("cluster_version"),
                    "cluster_security_group_id": format!("sg-{}", self.short_id(id, "cluster-sg")),
                    "cluster_oidc_issuer_url": format!("https://{}", oidc_host),
                    "oidc_provider_arn": self.context.iam_arn(&format!("oidc-provider/{}", oidc_host)),
                    "cluster_service_cidr": if ipv6 { DEFAULT_SERVICE_CIDR_V6 } else { DEFAULT_SERVICE_CIDR },
                    "access_entries": unit.attributes.get("access_entries"),
                })
            }
            UnitKind::IamRole => {
                let name = unit.attr_str("role_name").unwrap_or(id);
                json!({
                    "role_name": name,
                    "role_arn": self.context.iam_arn(&format!("role/{}", name)),
                    "role_unique_id": format!("AROA{}", self.short_id(id, "role").to_uppercase()),
                })
            }
            UnitKind::NodeGroup => {
                let name = unit.attr_str("name").unwrap_or(id);
                let cluster = unit.attr_str("cluster_name").unwrap_or_default();
                let suffix = self.short_id(id, "ng");
                json!({
                    "node_group_name": name,
                    "node_group_id": format!("{}:{}", cluster, name),
                    "node_group_arn": self.context.arn(
                        "eks",
                        &format!("nodegroup/{}/{}/{}", cluster, name, suffix)
                    ),
                    "node_group_status": "ACTIVE",
                    "desired_size": unit.attributes.get("desired_size"),
                })
            }
            UnitKind::Addon => {
                let name = unit.attr_str("addon_name").unwrap_or(id);
                let cluster = unit.attr_str("cluster_name").unwrap_or_default();
                json!({
                    "addon_name": name,
                    "addon_arn": self.context.arn(
                        "eks",
                        &format!("addon/{}/{}/{}", cluster, name, self.short_id(id, "addon"))
                    ),
                    "addon_version": unit.attributes.get("addon_version").cloned().unwrap_or(Value::Null),
                    "service_account_role_arn": unit.attributes.get("service_account_role_arn"),
                })
            }
        };

        match value {
            Value::Object(map) => map,
            _ => OutputMap::new(),
        }
    }
}

#[async_trait]
impl Provider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn create(&self, unit: &ResolvedUnit) -> ProviderResult<OutputMap> {
        self.enter(&unit.id, Operation::Create).await?;
        debug!("Created {} '{}'", unit.kind, unit.id);
        Ok(self.outputs(unit))
    }

    async fn update(&self, unit: &ResolvedUnit, previous: &UnitRecord) -> ProviderResult<OutputMap> {
        self.enter(&unit.id, Operation::Update).await?;
        if let Some(changes) = &unit.access_changes {
            debug!(
                "Applying {} access entry operations to '{}'",
                changes.len(),
                unit.id
            );
        }
        let mut outputs = previous.outputs.clone();
        outputs.extend(self.outputs(unit));
        Ok(outputs)
    }

    async fn delete(&self, record: &UnitRecord) -> ProviderResult<()> {
        self.enter(&record.id, Operation::Delete).await?;
        debug!("Deleted {} '{}'", record.kind, record.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Unit;
    use crate::sources::{names, ModuleCatalog};

    fn provider() -> SimulatedProvider {
        SimulatedProvider::new(ProviderContext::new(
            "us-east-2",
            "123456789012",
            "arn:aws:iam::123456789012:role/Admin",
        ))
    }

    fn role() -> ResolvedUnit {
        let pin = ModuleCatalog::defaults().get(names::IAM_ROLE).unwrap().clone();
        let unit = Unit::new("iam.vpc_cni_role", UnitKind::IamRole, pin);
        let mut attributes = OutputMap::new();
        attributes.insert("role_name".into(), json!("acme-prod-eks-vpc-cni"));
        ResolvedUnit::new(&unit, attributes)
    }

    #[tokio::test]
    async fn test_outputs_are_deterministic() {
        let a = provider().create(&role()).await.unwrap();
        let b = provider().create(&role()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a["role_arn"],
            json!("arn:aws:iam::123456789012:role/acme-prod-eks-vpc-cni")
        );
    }

    #[tokio::test]
    async fn test_transient_fault_clears() {
        let provider = provider();
        provider.inject("iam.vpc_cni_role", Operation::Create, Fault::Transient(1));
        assert!(provider.create(&role()).await.unwrap_err().is_transient());
        assert!(provider.create(&role()).await.is_ok());
        assert_eq!(provider.units_for(Operation::Create).len(), 2);
    }

    #[tokio::test]
    async fn test_fatal_fault_persists() {
        let provider = provider();
        provider.inject(
            "iam.vpc_cni_role",
            Operation::Create,
            Fault::Fatal("AccessDenied".into()),
        );
        for _ in 0..2 {
            let err = provider.create(&role()).await.unwrap_err();
            assert_eq!(err, ProviderError::Fatal("AccessDenied".into()));
        }
    }
}
