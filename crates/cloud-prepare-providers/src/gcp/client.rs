//! The slice of the Compute Engine API used by the GCP adapter.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use cloud_prepare_common::ApiError;

/// Direction of ingress firewall rules
pub const INGRESS: &str = "INGRESS";
/// Direction of egress firewall rules
pub const EGRESS: &str = "EGRESS";

/// Protocol and ports allowed by a firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirewallAllowed {
    /// `tcp` or `udp`
    pub ip_protocol: String,
    /// Single ports or ranges like `4500`
    pub ports: Vec<String>,
}

/// A VPC firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Firewall {
    /// Rule name, unique in the project
    pub name: String,
    /// `projects/{project}/global/networks/{network}`
    pub network: String,
    /// `INGRESS` or `EGRESS`
    pub direction: String,
    /// Allowed protocols and ports
    pub allowed: Vec<FirewallAllowed>,
    /// Instances the rule admits traffic from
    pub source_tags: Vec<String>,
    /// Instances the rule applies to
    pub target_tags: Vec<String>,
}

impl Firewall {
    /// True when both rules would admit the same traffic
    pub fn same_rules(&self, other: &Firewall) -> bool {
        self.network == other.network
            && self.direction == other.direction
            && self.allowed == other.allowed
            && self.source_tags == other.source_tags
            && self.target_tags == other.target_tags
    }
}

/// A VPC network
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Network {
    /// Network name
    pub name: String,
    /// Full resource URL
    pub self_link: String,
}

/// A zone of the project
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Zone {
    /// Zone name, e.g. `us-east1-b`
    pub name: String,
    /// Region URL, e.g. `.../regions/us-east1`
    pub region: String,
    /// `UP` or `DOWN`
    pub status: String,
}

impl Zone {
    /// Last path segment of the region URL
    pub fn region_name(&self) -> &str {
        self.region.rsplit('/').next().unwrap_or(&self.region)
    }
}

/// A compute instance
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Instance {
    /// Instance name
    pub name: String,
    /// Zone name
    pub zone: String,
    /// Network tags
    pub tags: Vec<String>,
    /// External NAT IPs of the instance's access configs
    pub nat_ips: Vec<String>,
}

impl Instance {
    /// True when the instance carries network tag `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Compute Engine operations for one project. Implementations wait for
/// long-running operations to finish before returning and report missing
/// resources with HTTP status 404.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Get a firewall rule by name
    async fn get_firewall_rule(&self, name: &str) -> Result<Firewall, ApiError>;

    /// Create a firewall rule
    async fn insert_firewall_rule(&self, rule: Firewall) -> Result<(), ApiError>;

    /// Replace the rule named `name`
    async fn update_firewall_rule(&self, name: &str, rule: Firewall) -> Result<(), ApiError>;

    /// Delete a firewall rule
    async fn delete_firewall_rule(&self, name: &str) -> Result<(), ApiError>;

    /// Get a network by name
    async fn get_network(&self, name: &str) -> Result<Network, ApiError>;

    /// Zones of the project
    async fn list_zones(&self) -> Result<Vec<Zone>, ApiError>;

    /// Instances in `zone`
    async fn list_instances(&self, zone: &str) -> Result<Vec<Instance>, ApiError>;
}
