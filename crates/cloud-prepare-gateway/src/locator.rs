//! Read-only lookup of cloud resources by deterministic name or tag.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use cloud_prepare_common::{Error, Result};

/// Kinds of resources a locator can find
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// AWS VPC
    Vpc,
    /// GCP or Azure network
    Network,
    /// Subnet
    Subnet,
    /// Security group / NSG
    SecurityGroup,
    /// GCP firewall rule
    FirewallRule,
    /// Compute instance / server
    Instance,
    /// VPC peering connection
    PeeringConnection,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Vpc => "vpc",
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::SecurityGroup => "security group",
            ResourceKind::FirewallRule => "firewall rule",
            ResourceKind::Instance => "instance",
            ResourceKind::PeeringConnection => "vpc peering connection",
        };
        f.write_str(name)
    }
}

/// A resource found in the cloud
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloudResource {
    /// Provider identifier (vpc-..., sg-..., self link, resource ID)
    pub id: String,
    /// Name (or `Name` tag)
    pub name: String,
    /// Zone, for zonal resources
    pub zone: Option<String>,
    /// Tags or labels
    pub tags: BTreeMap<String, String>,
}

impl CloudResource {
    /// A resource with an id and name
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the zone
    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    /// Add a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// True when the resource has a tag with this key
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }
}

/// Finds resources by the naming and tagging conventions of a cluster.
///
/// Zero matches is `Ok(None)` or an empty `Vec`, never an error. Transport
/// and authorization failures are errors.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceLocator: Send + Sync {
    /// Find a single resource by exact name (names may contain `*` wildcards)
    async fn find_by_name(&self, kind: ResourceKind, name: &str) -> Result<Option<CloudResource>>;

    /// Find every resource carrying a tag whose key starts with `tag_prefix`
    async fn find_by_tag(&self, kind: ResourceKind, tag_prefix: &str) -> Result<Vec<CloudResource>>;
}

/// Look up a base resource the cluster cannot work without.
///
/// Absence is fatal here, unlike ordinary lookups where it selects the create path.
pub async fn require<L>(locator: &L, kind: ResourceKind, name: &str) -> Result<CloudResource>
where
    L: ResourceLocator + ?Sized,
{
    locator
        .find_by_name(kind, name)
        .await?
        .ok_or_else(|| Error::not_found(kind.to_string(), name))
}
