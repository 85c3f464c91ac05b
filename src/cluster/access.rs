//! Cluster access entries.
//!
//! Access entries bind IAM principals to Kubernetes groups and EKS access
//! policies. Validation guarantees that at least one principal can administer
//! the cluster after creation; reconciliation computes the minimal set of
//! entry and association changes between two maps.

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::PRINCIPAL_ARN_REGEX;
use crate::error::{Error, Result};

/// Policies that grant full administrative control when scoped to the cluster
pub const ADMIN_POLICIES: &[&str] = &["AmazonEKSClusterAdminPolicy", "AmazonEKSAdminPolicy"];

/// Policy attached to the cluster creator when bootstrap admin is enabled
pub const CLUSTER_ADMIN_POLICY: &str = "AmazonEKSClusterAdminPolicy";

/// Scope of a policy association
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AccessScope {
    Cluster,
    Namespace { namespaces: Vec<String> },
}

impl AccessScope {
    fn normalized(self) -> Self {
        match self {
            AccessScope::Namespace { mut namespaces } => {
                namespaces.sort();
                namespaces.dedup();
                AccessScope::Namespace { namespaces }
            }
            scope => scope,
        }
    }
}

/// One access entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub principal_arn: String,
    #[serde(default)]
    pub kubernetes_groups: BTreeSet<String>,
    #[serde(rename = "type", default = "default_entry_type")]
    pub entry_type: String,
    /// Policy ARN to scope
    #[serde(default)]
    pub policy_associations: BTreeMap<String, AccessScope>,
}

fn default_entry_type() -> String {
    "STANDARD".to_string()
}

impl AccessEntry {
    pub fn new(principal_arn: impl Into<String>) -> Self {
        Self {
            principal_arn: principal_arn.into(),
            kubernetes_groups: BTreeSet::new(),
            entry_type: default_entry_type(),
            policy_associations: BTreeMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: impl Into<String>, scope: AccessScope) -> Self {
        self.policy_associations.insert(policy.into(), scope);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.kubernetes_groups.insert(group.into());
        self
    }

    /// Whether any association grants cluster-wide admin
    pub fn is_admin(&self) -> bool {
        self.policy_associations.iter().any(|(policy, scope)| {
            *scope == AccessScope::Cluster && ADMIN_POLICIES.contains(&policy_name(policy))
        })
    }
}

/// Short policy name from a full access policy ARN (or a bare name).
pub fn policy_name(policy: &str) -> &str {
    policy.rsplit('/').next().unwrap_or(policy)
}

/// Full access policy ARN for a short name. ARNs pass through unchanged.
pub fn policy_arn(partition: &str, policy: &str) -> String {
    if policy.starts_with("arn:") {
        policy.to_string()
    } else {
        format!("arn:{}:eks::aws:cluster-access-policy/{}", partition, policy)
    }
}

/// Access entries keyed by principal ARN, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessEntryMap {
    entries: IndexMap<String, AccessEntry>,
}

impl AccessEntryMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the map from a list. Principals must be IAM role/user ARNs and
    /// appear at most once. Policy names are expanded to ARNs.
    pub fn from_entries(entries: Vec<AccessEntry>, partition: &str) -> Result<Self> {
        let mut map = Self::new();
        for mut entry in entries {
            if !PRINCIPAL_ARN_REGEX.is_match(&entry.principal_arn)
                || entry.principal_arn.contains(":assumed-role/")
            {
                return Err(Error::invalid_field(
                    "cluster",
                    "access_entries",
                    format!("'{}' is not an IAM role or user ARN", entry.principal_arn),
                ));
            }
            if map.entries.contains_key(&entry.principal_arn) {
                return Err(Error::invalid_field(
                    "cluster",
                    "access_entries",
                    format!("principal '{}' listed more than once", entry.principal_arn),
                ));
            }
            entry.policy_associations = std::mem::take(&mut entry.policy_associations)
                .into_iter()
                .map(|(policy, scope)| (policy_arn(partition, &policy), scope.normalized()))
                .collect();
            map.entries.insert(entry.principal_arn.clone(), entry);
        }
        Ok(map)
    }

    pub fn get(&self, principal: &str) -> Option<&AccessEntry> {
        self.entries.get(principal)
    }

    pub fn contains(&self, principal: &str) -> bool {
        self.entries.contains_key(principal)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccessEntry> {
        self.entries.values()
    }

    /// Principals holding a cluster-scoped admin policy
    pub fn admins(&self) -> Vec<&str> {
        self.entries
            .values()
            .filter(|e| e.is_admin())
            .map(|e| e.principal_arn.as_str())
            .collect()
    }

    /// The map as the cluster will see it when the creator is granted admin.
    pub fn with_cluster_creator(&self, creator_arn: &str, partition: &str) -> Self {
        let mut map = self.clone();
        let policy = policy_arn(partition, CLUSTER_ADMIN_POLICY);
        map.entries
            .entry(creator_arn.to_string())
            .or_insert_with(|| AccessEntry::new(creator_arn))
            .policy_associations
            .entry(policy)
            .or_insert(AccessScope::Cluster);
        map
    }

    /// Check that the cluster stays manageable.
    ///
    /// Returns warnings for the plan. Fails with [`Error::Lockout`] when no
    /// principal would hold cluster admin.
    pub fn validate(
        &self,
        cluster: &str,
        caller_arn: &str,
        bootstrap_creator_admin: bool,
        partition: &str,
    ) -> Result<Vec<String>> {
        let effective = if bootstrap_creator_admin {
            self.with_cluster_creator(caller_arn, partition)
        } else {
            self.clone()
        };

        if effective.admins().is_empty() {
            return Err(Error::Lockout {
                cluster: cluster.to_string(),
            });
        }

        let mut warnings = Vec::new();
        if !effective.contains(caller_arn) {
            let message = format!(
                "applying identity '{}' has no access entry on cluster '{}'; it will not be able to reach the Kubernetes API",
                caller_arn, cluster
            );
            warn!("{}", message);
            warnings.push(message);
        }
        Ok(warnings)
    }

    fn associations(&self) -> BTreeSet<PolicyAssociation> {
        self.entries
            .values()
            .flat_map(|entry| {
                entry
                    .policy_associations
                    .iter()
                    .map(move |(policy, scope)| PolicyAssociation {
                        principal_arn: entry.principal_arn.clone(),
                        policy_arn: policy.clone(),
                        scope: scope.clone(),
                    })
            })
            .collect()
    }
}

/// A single (principal, policy, scope) binding
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyAssociation {
    pub principal_arn: String,
    pub policy_arn: String,
    pub scope: AccessScope,
}

/// Changes that take one access entry map to another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessChangeSet {
    pub entries_to_create: Vec<String>,
    pub entries_to_delete: Vec<String>,
    /// Surviving entries whose Kubernetes groups or type changed
    pub entries_to_update: Vec<String>,
    pub associations_to_add: Vec<PolicyAssociation>,
    pub associations_to_remove: Vec<PolicyAssociation>,
}

impl AccessChangeSet {
    pub fn is_empty(&self) -> bool {
        self.entries_to_create.is_empty()
            && self.entries_to_delete.is_empty()
            && self.entries_to_update.is_empty()
            && self.associations_to_add.is_empty()
            && self.associations_to_remove.is_empty()
    }

    /// Number of individual API operations
    pub fn len(&self) -> usize {
        self.entries_to_create.len()
            + self.entries_to_delete.len()
            + self.entries_to_update.len()
            + self.associations_to_add.len()
            + self.associations_to_remove.len()
    }
}

/// Compute the changes from `previous` to `desired` as set differences.
///
/// Entries present in both maps with identical content produce nothing.
pub fn reconcile(previous: &AccessEntryMap, desired: &AccessEntryMap) -> AccessChangeSet {
    let prev_keys: BTreeSet<&String> = previous.entries.keys().collect();
    let next_keys: BTreeSet<&String> = desired.entries.keys().collect();

    let entries_to_update = prev_keys
        .intersection(&next_keys)
        .filter(|key| {
            let old = &previous.entries[key.as_str()];
            let new = &desired.entries[key.as_str()];
            old.kubernetes_groups != new.kubernetes_groups || old.entry_type != new.entry_type
        })
        .map(|key| (*key).clone())
        .collect();

    let prev_assoc = previous.associations();
    let next_assoc = desired.associations();

    AccessChangeSet {
        entries_to_create: next_keys.difference(&prev_keys).map(|k| (*k).clone()).collect(),
        entries_to_delete: prev_keys.difference(&next_keys).map(|k| (*k).clone()).collect(),
        entries_to_update,
        associations_to_add: next_assoc.difference(&prev_assoc).cloned().collect(),
        associations_to_remove: prev_assoc.difference(&next_assoc).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: &str = "arn:aws:iam::123456789012:role/Admin";
    const DEV: &str = "arn:aws:iam::123456789012:role/Developer";
    const CI: &str = "arn:aws:iam::123456789012:user/ci";

    fn map(entries: Vec<AccessEntry>) -> AccessEntryMap {
        AccessEntryMap::from_entries(entries, "aws").unwrap()
    }

    fn admin() -> AccessEntry {
        AccessEntry::new(ADMIN).with_policy(CLUSTER_ADMIN_POLICY, AccessScope::Cluster)
    }

    fn developer() -> AccessEntry {
        AccessEntry::new(DEV).with_policy(
            "AmazonEKSEditPolicy",
            AccessScope::Namespace {
                namespaces: vec!["apps".into()],
            },
        )
    }

    #[test]
    fn test_policy_names_expand_to_arns() {
        let m = map(vec![admin()]);
        let entry = m.get(ADMIN).unwrap();
        assert!(entry.policy_associations.contains_key(
            "arn:aws:eks::aws:cluster-access-policy/AmazonEKSClusterAdminPolicy"
        ));
        assert!(entry.is_admin());
    }

    #[test]
    fn test_duplicate_principal_rejected() {
        let err = AccessEntryMap::from_entries(vec![admin(), admin()], "aws").unwrap_err();
        assert!(matches!(err, Error::InvalidField { ref field, .. } if field == "access_entries"));
    }

    #[test]
    fn test_invalid_principal_rejected() {
        assert!(AccessEntryMap::from_entries(vec![AccessEntry::new("admin")], "aws").is_err());
        let session = AccessEntry::new("arn:aws:sts::123456789012:assumed-role/Admin/jane");
        assert!(AccessEntryMap::from_entries(vec![session], "aws").is_err());
    }

    #[test]
    fn test_zero_admins_is_lockout() {
        let m = map(vec![developer()]);
        let err = m.validate("acme-eks", CI, false, "aws").unwrap_err();
        assert!(matches!(err, Error::Lockout { ref cluster } if cluster == "acme-eks"));
    }

    #[test]
    fn test_namespace_scoped_admin_policy_is_not_admin() {
        let entry = AccessEntry::new(DEV).with_policy(
            "AmazonEKSAdminPolicy",
            AccessScope::Namespace {
                namespaces: vec!["apps".into()],
            },
        );
        let m = map(vec![entry]);
        assert!(m.admins().is_empty());
        assert!(m.validate("acme-eks", CI, false, "aws").is_err());
    }

    #[test]
    fn test_bootstrap_creator_prevents_lockout() {
        let m = map(vec![developer()]);
        let warnings = m.validate("acme-eks", CI, true, "aws").unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn test_caller_absent_warns() {
        let m = map(vec![admin()]);
        let warnings = m.validate("acme-eks", CI, false, "aws").unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains(CI));
    }

    #[test]
    fn test_reconcile_identical_is_empty() {
        let m = map(vec![admin(), developer()]);
        assert!(reconcile(&m, &m).is_empty());
    }

    #[test]
    fn test_reconcile_set_differences() {
        let previous = map(vec![admin(), developer()]);
        let desired = map(vec![
            admin().with_group("platform"),
            AccessEntry::new(CI).with_policy("AmazonEKSViewPolicy", AccessScope::Cluster),
        ]);

        let changes = reconcile(&previous, &desired);
        assert_eq!(changes.entries_to_create, vec![CI.to_string()]);
        assert_eq!(changes.entries_to_delete, vec![DEV.to_string()]);
        assert_eq!(changes.entries_to_update, vec![ADMIN.to_string()]);
        assert_eq!(changes.associations_to_add.len(), 1);
        assert_eq!(changes.associations_to_add[0].principal_arn, CI);
        assert_eq!(changes.associations_to_remove.len(), 1);
        assert_eq!(changes.associations_to_remove[0].principal_arn, DEV);
    }

    #[test]
    fn test_reconcile_scope_change() {
        let previous = map(vec![admin(), developer()]);
        let desired = map(vec![
            admin(),
            AccessEntry::new(DEV).with_policy(
                "AmazonEKSEditPolicy",
                AccessScope::Namespace {
                    namespaces: vec!["apps".into(), "jobs".into()],
                },
            ),
        ]);
        let changes = reconcile(&previous, &desired);
        assert!(changes.entries_to_create.is_empty());
        assert!(changes.entries_to_delete.is_empty());
        assert_eq!(changes.associations_to_add.len(), 1);
        assert_eq!(changes.associations_to_remove.len(), 1);
    }

    #[test]
    fn test_serde_roundtrip_keeps_order() {
        let m = map(vec![developer(), admin()]);
        let json = serde_json::to_value(&m).unwrap();
        let back: AccessEntryMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
        let order: Vec<&str> = back.iter().map(|e| e.principal_arn.as_str()).collect();
        assert_eq!(order, vec![DEV, ADMIN]);
    }
}
