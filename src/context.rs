//! Naming and provider context.
//!
//! The naming context turns namespace/environment/stage/name/attributes into
//! a deterministic resource id and a base tag set. The provider context holds
//! the caller identity and region. Both are immutable once built and are
//! passed explicitly to every unit constructor.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::graph::{Declare, Unit, UnitKind};
use crate::sources::{names, ModuleCatalog};
use crate::tags::Tags;

/// Id of the data-only root unit
pub const CONTEXT_UNIT: &str = "context";

/// Characters stripped from every label before it is joined into an id
static LABEL_SANITIZER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^-a-zA-Z0-9]").expect("Invalid label sanitizer regex"));

static REGION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]{2}(-gov|-iso[a-z]?)?-[a-z]+-\d$").expect("Invalid region regex")
});

static ACCOUNT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{12}$").expect("Invalid account regex"));

/// IAM or STS identity ARN
pub static PRINCIPAL_ARN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^arn:aws(-cn|-us-gov)?:(iam|sts)::\d{12}:(role|user|assumed-role)/[\w+=,.@/-]+$")
        .expect("Invalid principal ARN regex")
});

/// Labels that make up a resource id, in the order they are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    Namespace,
    Environment,
    Stage,
    Name,
    Attributes,
}

impl Label {
    /// Default join order
    pub fn default_order() -> Vec<Label> {
        vec![
            Label::Namespace,
            Label::Environment,
            Label::Stage,
            Label::Name,
            Label::Attributes,
        ]
    }
}

/// Naming convention shared by every unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingContext {
    /// Organization or project prefix
    pub namespace: Option<String>,
    /// Region or environment label
    pub environment: Option<String>,
    /// Deployment stage (prod, staging, dev)
    pub stage: Option<String>,
    /// Component name
    pub name: Option<String>,
    /// Extra qualifiers appended after the name
    pub attributes: Vec<String>,
    /// Separator used when joining labels
    pub delimiter: String,
    /// Context-level tags merged over the generated ones
    pub tags: Tags,
    /// Join order of the labels
    pub label_order: Vec<Label>,
}

impl Default for NamingContext {
    fn default() -> Self {
        Self {
            namespace: None,
            environment: None,
            stage: None,
            name: None,
            attributes: Vec::new(),
            delimiter: "-".to_string(),
            tags: Tags::new(),
            label_order: Label::default_order(),
        }
    }
}

impl NamingContext {
    /// Create a context with just a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Derive a child context with additional attributes.
    pub fn with_attributes<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut child = self.clone();
        child.attributes.extend(extra.into_iter().map(Into::into));
        child
    }

    fn sanitize(label: &str) -> String {
        LABEL_SANITIZER.replace_all(label, "").to_lowercase()
    }

    fn label_value(&self, label: Label) -> Option<String> {
        let value = match label {
            Label::Namespace => self.namespace.as_deref().map(Self::sanitize),
            Label::Environment => self.environment.as_deref().map(Self::sanitize),
            Label::Stage => self.stage.as_deref().map(Self::sanitize),
            Label::Name => self.name.as_deref().map(Self::sanitize),
            Label::Attributes => {
                let attrs: Vec<String> = self
                    .attributes
                    .iter()
                    .map(|a| Self::sanitize(a))
                    .filter(|a| !a.is_empty())
                    .collect();
                Some(attrs.join(&self.delimiter))
            }
        };
        value.filter(|v| !v.is_empty())
    }

    /// The resource id: non-empty labels joined with the delimiter.
    pub fn id(&self) -> String {
        self.label_order
            .iter()
            .filter_map(|label| self.label_value(*label))
            .collect::<Vec<_>>()
            .join(&self.delimiter)
    }

    /// Generated tags merged with the context's own tags.
    pub fn tags(&self) -> Tags {
        let mut generated = Tags::new().with("Name", self.id());
        if let Some(ns) = self.label_value(Label::Namespace) {
            generated.insert("Namespace", ns);
        }
        if let Some(env) = self.label_value(Label::Environment) {
            generated.insert("Environment", env);
        }
        if let Some(stage) = self.label_value(Label::Stage) {
            generated.insert("Stage", stage);
        }
        if let Some(attrs) = self.label_value(Label::Attributes) {
            generated.insert("Attributes", attrs);
        }
        generated.merge(&self.tags)
    }

    /// Check that the context produces a usable id.
    pub fn validate(&self) -> Result<()> {
        if self.delimiter.chars().count() > 1 {
            return Err(Error::invalid_field(
                "context",
                "delimiter",
                "must be empty or a single character",
            ));
        }
        if self.label_value(Label::Name).is_none() && self.label_value(Label::Namespace).is_none() {
            return Err(Error::invalid_field(
                "context",
                "name",
                "at least one of namespace or name must be set",
            ));
        }
        let mut seen = Vec::new();
        for label in &self.label_order {
            if seen.contains(label) {
                return Err(Error::invalid_field(
                    "context",
                    "label_order",
                    format!("label '{:?}' listed more than once", label),
                ));
            }
            seen.push(*label);
        }
        Ok(())
    }
}

/// Caller identity and region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderContext {
    pub region: String,
    pub partition: String,
    pub account_id: String,
    /// ARN of the applying identity, as returned by the caller-identity call
    pub caller_arn: String,
}

impl ProviderContext {
    /// Build a context, deriving the partition from the region
    pub fn new(
        region: impl Into<String>,
        account_id: impl Into<String>,
        caller_arn: impl Into<String>,
    ) -> Self {
        let region = region.into();
        let partition = if region.starts_with("cn-") {
            "aws-cn"
        } else if region.starts_with("us-gov-") {
            "aws-us-gov"
        } else {
            "aws"
        };

        Self {
            partition: partition.to_string(),
            region,
            account_id: account_id.into(),
            caller_arn: caller_arn.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !REGION_REGEX.is_match(&self.region) {
            return Err(Error::invalid_field(
                "context",
                "region",
                format!("'{}' is not a valid region", self.region),
            ));
        }
        if !ACCOUNT_REGEX.is_match(&self.account_id) {
            return Err(Error::invalid_field(
                "context",
                "caller.account_id",
                "must be a 12 digit account id",
            ));
        }
        if !PRINCIPAL_ARN_REGEX.is_match(&self.caller_arn) {
            return Err(Error::invalid_field(
                "context",
                "caller.arn",
                format!("'{}' is not an IAM or STS identity ARN", self.caller_arn),
            ));
        }
        Ok(())
    }

    /// Regional service ARN
    pub fn arn(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:{}:{}:{}:{}:{}",
            self.partition, service, self.region, self.account_id, resource
        )
    }

    /// Global IAM ARN in this account
    pub fn iam_arn(&self, resource: &str) -> String {
        format!("arn:{}:iam::{}:{}", self.partition, self.account_id, resource)
    }

    /// AWS-managed IAM policy ARN
    pub fn managed_policy_arn(&self, policy: &str) -> String {
        format!("arn:{}:iam::aws:policy/{}", self.partition, policy)
    }

    /// The IAM principal behind the caller.
    ///
    /// An assumed-role session ARN maps back to the role that issued it, which
    /// is what access entries must reference.
    pub fn issuer_arn(&self) -> String {
        let Some(rest) = self.caller_arn.split_once(":assumed-role/").map(|(_, r)| r) else {
            return self.caller_arn.clone();
        };
        let role = rest.split('/').next().unwrap_or(rest);
        self.iam_arn(&format!("role/{}", role))
    }

    /// Expand a bare availability zone suffix (`a`) into a zone name.
    pub fn zone_name(&self, zone: &str) -> String {
        if zone.len() <= 2 && zone.chars().all(|c| c.is_ascii_alphabetic()) {
            format!("{}{}", self.region, zone)
        } else {
            zone.to_string()
        }
    }
}

/// Naming and provider context together, declared as the root unit.
///
/// The unit has no provider resource; its outputs are its own attributes, so
/// every other unit reads names and identity through ordinary references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackContext {
    pub naming: NamingContext,
    pub provider: ProviderContext,
}

impl StackContext {
    pub fn new(naming: NamingContext, provider: ProviderContext) -> Result<Self> {
        naming.validate()?;
        provider.validate()?;
        Ok(Self { naming, provider })
    }
}

impl Declare for StackContext {
    fn declare(&self, catalog: &ModuleCatalog) -> Result<Unit> {
        Ok(
            Unit::new(CONTEXT_UNIT, UnitKind::Context, catalog.get(names::LABEL)?.clone())
                .attr("id", self.naming.id())
                .attr("tags", self.naming.tags().to_json())
                .attr("context", serde_json::to_value(&self.naming)?)
                .attr("region", self.provider.region.as_str())
                .attr("partition", self.provider.partition.as_str())
                .attr("account_id", self.provider.account_id.as_str())
                .attr("caller_arn", self.provider.caller_arn.as_str()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_joins_non_empty_labels() {
        let ctx = NamingContext::named("eks")
            .with_namespace("Acme")
            .with_stage("prod");
        assert_eq!(ctx.id(), "acme-prod-eks");
    }

    #[test]
    fn test_id_with_attributes() {
        let ctx = NamingContext::named("eks").with_namespace("acme");
        let child = ctx.with_attributes(["private", "us-east-2a"]);
        assert_eq!(child.id(), "acme-eks-private-us-east-2a");
        // parent untouched
        assert_eq!(ctx.id(), "acme-eks");
    }

    #[test]
    fn test_id_is_deterministic() {
        let ctx = NamingContext::named("eks").with_stage("dev");
        assert_eq!(ctx.id(), ctx.clone().id());
        assert_eq!(ctx.tags(), ctx.tags());
    }

    #[test]
    fn test_sanitizes_labels() {
        let ctx = NamingContext::named("my_cluster!").with_namespace("acme corp");
        assert_eq!(ctx.id(), "acmecorp-mycluster");
    }

    #[test]
    fn test_tags_include_generated_and_user() {
        let ctx = NamingContext::named("eks")
            .with_namespace("acme")
            .with_stage("prod")
            .with_tags(Tags::new().with("Team", "platform").with("Stage", "override"));
        let tags = ctx.tags();
        assert_eq!(tags.get("Name"), Some("acme-prod-eks"));
        assert_eq!(tags.get("Namespace"), Some("acme"));
        assert_eq!(tags.get("Team"), Some("platform"));
        assert_eq!(tags.get("Stage"), Some("override"));
        assert!(!tags.contains_key("Environment"));
    }

    #[test]
    fn test_validate_requires_name_or_namespace() {
        let ctx = NamingContext::default();
        assert!(matches!(ctx.validate(), Err(Error::InvalidField { .. })));
    }

    #[test]
    fn test_partition_from_region() {
        let ctx = ProviderContext::new("cn-north-1", "123456789012", "arn:aws-cn:iam::123456789012:user/ci");
        assert_eq!(ctx.partition, "aws-cn");
        let ctx = ProviderContext::new("us-east-2", "123456789012", "arn:aws:iam::123456789012:user/ci");
        assert_eq!(ctx.partition, "aws");
        assert!(ctx.validate().is_ok());
    }

    #[test]
    fn test_issuer_arn_from_assumed_role() {
        let ctx = ProviderContext::new(
            "us-east-2",
            "123456789012",
            "arn:aws:sts::123456789012:assumed-role/Admin/jane@example.com",
        );
        assert_eq!(ctx.issuer_arn(), "arn:aws:iam::123456789012:role/Admin");
    }

    #[test]
    fn test_zone_name_expansion() {
        let ctx = ProviderContext::new("us-east-2", "123456789012", "arn:aws:iam::123456789012:user/ci");
        assert_eq!(ctx.zone_name("a"), "us-east-2a");
        assert_eq!(ctx.zone_name("us-west-2b"), "us-west-2b");
    }

    #[test]
    fn test_context_unit_is_a_data_only_leaf() {
        let ctx = StackContext::new(
            NamingContext::named("eks").with_namespace("acme"),
            ProviderContext::new("us-east-2", "123456789012", "arn:aws:iam::123456789012:user/ci"),
        )
        .unwrap();
        let unit = ctx.declare(&ModuleCatalog::defaults()).unwrap();
        assert_eq!(unit.id, CONTEXT_UNIT);
        assert!(!unit.kind.is_destructible());
        assert!(unit.references().is_empty());
        assert_eq!(unit.declared()["id"], serde_json::json!("acme-eks"));
    }

    #[test]
    fn test_invalid_account_rejected() {
        let ctx = ProviderContext::new("us-east-2", "1234", "arn:aws:iam::123456789012:user/ci");
        assert!(ctx.validate().is_err());
    }
}
