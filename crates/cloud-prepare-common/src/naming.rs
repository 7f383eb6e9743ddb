//! Deterministic resource names derived from the infra ID and region.

/// Renders name templates for one cluster.
///
/// Templates use `{infraID}` and `{region}` placeholders, e.g.
/// `"{infraID}-public-{region}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    infra_id: String,
    region: String,
}

impl Naming {
    /// Create a renderer for a cluster
    pub fn new(infra_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            infra_id: infra_id.into(),
            region: region.into(),
        }
    }

    /// Cluster infra ID
    pub fn infra_id(&self) -> &str {
        &self.infra_id
    }

    /// Cluster region
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Substitute `{infraID}` and `{region}` in `template`
    pub fn render(&self, template: &str) -> String {
        template
            .replace("{infraID}", &self.infra_id)
            .replace("{region}", &self.region)
    }

    /// `{infraID}-{suffix}`
    pub fn with_suffix(&self, suffix: &str) -> String {
        format!("{}-{}", self.infra_id, suffix)
    }

    /// Dedicated gateway name for a zone: `{infraID}-submariner-gw-{zone}`
    pub fn gateway_name(&self, zone: &str) -> String {
        format!("{}-submariner-gw-{}", self.infra_id, zone)
    }

    /// Prefix shared by every dedicated gateway of this cluster
    pub fn gateway_prefix(&self) -> String {
        format!("{}-submariner-gw-", self.infra_id)
    }

    /// Security group attached to gateways: `{infraID}-submariner-gw-sg`
    pub fn gateway_security_group(&self) -> String {
        self.with_suffix("submariner-gw-sg")
    }
}
