//! Pinned external module sources.
//!
//! Each unit kind is backed by an external, independently released module.
//! Pins are explicit records (name, source, exact version) with a content
//! digest over `source@version`, validated when the stack loads.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

static SOURCE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_-]*/[a-z0-9][a-z0-9_-]*/[a-z0-9]+(//[A-Za-z0-9_./-]+)?$")
        .expect("Invalid module source regex")
});

/// Catalog names of the modules backing each unit kind.
pub mod names {
    pub const LABEL: &str = "label";
    pub const VPC: &str = "vpc";
    pub const SUBNETS: &str = "subnets";
    pub const CLUSTER: &str = "cluster";
    pub const IAM_ROLE: &str = "iam_role";
    pub const NODE_GROUP: &str = "node_group";
    pub const ADDON: &str = "addon";
}

/// A version-pinned module reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModulePin {
    pub name: String,
    pub source: String,
    pub version: String,
    /// Hex SHA-256 of `source@version`
    pub digest: String,
}

impl ModulePin {
    /// Create and validate a pin
    pub fn new(name: impl Into<String>, source: impl Into<String>, version: &str) -> Result<Self> {
        let name = name.into();
        let source = source.into();

        if !SOURCE_REGEX.is_match(&source) {
            return Err(Error::InvalidModulePin {
                name,
                message: format!(
                    "source '{}' must look like namespace/name/provider[//subpath]",
                    source
                ),
            });
        }

        let parsed = semver::Version::parse(version).map_err(|e| Error::InvalidModulePin {
            name: name.clone(),
            message: format!("version '{}' is not an exact semantic version: {}", version, e),
        })?;

        let version = parsed.to_string();
        let digest = Self::compute_digest(&source, &version);

        Ok(Self {
            name,
            source,
            version,
            digest,
        })
    }

    fn compute_digest(source: &str, version: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        hasher.update(b"@");
        hasher.update(version.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Check that the recorded digest matches the source and version.
    pub fn verify(&self) -> Result<()> {
        if Self::compute_digest(&self.source, &self.version) != self.digest {
            return Err(Error::InvalidModulePin {
                name: self.name.clone(),
                message: "digest does not match source and version".to_string(),
            });
        }
        Ok(())
    }

    /// `source@version` reference string
    pub fn reference(&self) -> String {
        format!("{}@{}", self.source, self.version)
    }
}

/// Source override supplied in the stack file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinOverride {
    pub source: Option<String>,
    pub version: String,
}

/// The set of pins used to declare units.
#[derive(Debug, Clone)]
pub struct ModuleCatalog {
    pins: IndexMap<String, ModulePin>,
}

impl ModuleCatalog {
    /// The default pins
    pub fn defaults() -> Self {
        let defaults = [
            (names::LABEL, "cloudposse/label/null", "0.25.0"),
            (names::VPC, "cloudposse/vpc/aws", "2.2.0"),
            (names::SUBNETS, "cloudposse/dynamic-subnets/aws", "2.4.2"),
            (names::CLUSTER, "terraform-aws-modules/eks/aws", "20.24.0"),
            (
                names::IAM_ROLE,
                "terraform-aws-modules/iam/aws//modules/iam-role-for-service-accounts-eks",
                "5.44.0",
            ),
            (
                names::NODE_GROUP,
                "terraform-aws-modules/eks/aws//modules/eks-managed-node-group",
                "20.24.0",
            ),
            (names::ADDON, "terraform-aws-modules/eks/aws", "20.24.0"),
        ];

        let pins = defaults
            .into_iter()
            .map(|(name, source, version)| {
                let pin = ModulePin {
                    name: name.to_string(),
                    source: source.to_string(),
                    version: version.to_string(),
                    digest: ModulePin::compute_digest(source, version),
                };
                (name.to_string(), pin)
            })
            .collect();

        Self { pins }
    }

    /// Apply overrides from the stack file. Unknown names are rejected.
    pub fn with_overrides(mut self, overrides: &IndexMap<String, PinOverride>) -> Result<Self> {
        for (name, over) in overrides {
            let current = self.pins.get(name).ok_or_else(|| Error::InvalidModulePin {
                name: name.clone(),
                message: format!(
                    "unknown module; expected one of: {}",
                    self.pins.keys().cloned().collect::<Vec<_>>().join(", ")
                ),
            })?;
            let source = over.source.clone().unwrap_or_else(|| current.source.clone());
            let pin = ModulePin::new(name.clone(), source, &over.version)?;
            self.pins.insert(name.clone(), pin);
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&ModulePin> {
        self.pins.get(name).ok_or_else(|| Error::InvalidModulePin {
            name: name.to_string(),
            message: "no pin registered".to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModulePin> {
        self.pins.values()
    }
}

impl Default for ModuleCatalog {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_digest_is_content_addressed() {
        let a = ModulePin::new("vpc", "cloudposse/vpc/aws", "2.2.0").unwrap();
        let b = ModulePin::new("other-name", "cloudposse/vpc/aws", "2.2.0").unwrap();
        let c = ModulePin::new("vpc", "cloudposse/vpc/aws", "2.2.1").unwrap();
        assert_eq!(a.digest, b.digest);
        assert_ne!(a.digest, c.digest);
        assert!(a.verify().is_ok());
    }

    #[test]
    fn test_rejects_version_ranges() {
        let err = ModulePin::new("vpc", "cloudposse/vpc/aws", "~> 2.0").unwrap_err();
        assert!(matches!(err, Error::InvalidModulePin { .. }));
    }

    #[test]
    fn test_rejects_bad_source() {
        assert!(ModulePin::new("vpc", "https://example.com/vpc.zip", "1.0.0").is_err());
    }

    #[test]
    fn test_subpath_source() {
        let pin = ModulePin::new(
            "iam_role",
            "terraform-aws-modules/iam/aws//modules/iam-role-for-service-accounts-eks",
            "5.44.0",
        )
        .unwrap();
        assert_eq!(
            pin.reference(),
            "terraform-aws-modules/iam/aws//modules/iam-role-for-service-accounts-eks@5.44.0"
        );
    }

    #[test]
    fn test_tampered_pin_fails_verification() {
        let mut pin = ModulePin::new("vpc", "cloudposse/vpc/aws", "2.2.0").unwrap();
        pin.version = "9.9.9".to_string();
        assert!(pin.verify().is_err());
    }

    #[test]
    fn test_catalog_overrides() {
        let mut overrides = IndexMap::new();
        overrides.insert(
            "vpc".to_string(),
            PinOverride {
                source: None,
                version: "2.3.0".to_string(),
            },
        );
        let catalog = ModuleCatalog::defaults().with_overrides(&overrides).unwrap();
        assert_eq!(catalog.get("vpc").unwrap().version, "2.3.0");
        assert_eq!(catalog.get("vpc").unwrap().source, "cloudposse/vpc/aws");
    }

    #[test]
    fn test_catalog_rejects_unknown_override() {
        let mut overrides = IndexMap::new();
        overrides.insert(
            "karpenter".to_string(),
            PinOverride {
                source: None,
                version: "1.0.0".to_string(),
            },
        );
        assert!(ModuleCatalog::defaults().with_overrides(&overrides).is_err());
    }

    #[test]
    fn test_default_pins_verify() {
        for pin in ModuleCatalog::defaults().iter() {
            assert!(pin.verify().is_ok(), "{} failed verification", pin.name);
        }
    }
}
