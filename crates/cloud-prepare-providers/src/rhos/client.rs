//! The slice of the OpenStack networking and compute APIs used by the RHOS
//! adapter.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use cloud_prepare_common::{ApiError, Direction, PortSpec};

/// A Neutron security group rule
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecGroupRule {
    /// Assigned on creation
    pub id: String,
    /// Group the rule belongs to
    pub security_group_id: String,
    /// `ingress` or `egress`
    pub direction: String,
    /// `tcp` or `udp`
    pub protocol: String,
    /// First port
    pub port_range_min: u16,
    /// Last port
    pub port_range_max: u16,
    /// Source CIDR
    pub remote_ip_prefix: Option<String>,
    /// Source security group
    pub remote_group_id: Option<String>,
    /// Marks managed rules
    pub description: String,
}

impl SecGroupRule {
    /// A single-port rule of group `group_id`
    pub fn new(group_id: &str, direction: Direction, port: PortSpec, description: &str) -> Self {
        Self {
            security_group_id: group_id.to_string(),
            direction: direction.as_str().to_string(),
            protocol: port.protocol.as_str().to_string(),
            port_range_min: port.port,
            port_range_max: port.port,
            description: description.to_string(),
            ..Default::default()
        }
    }

    /// Admit traffic from members of `remote_group_id`
    pub fn from_group(mut self, remote_group_id: &str) -> Self {
        self.remote_group_id = Some(remote_group_id.to_string());
        self
    }

    /// Admit traffic from CIDR `prefix`
    pub fn from_prefix(mut self, prefix: &str) -> Self {
        self.remote_ip_prefix = Some(prefix.to_string());
        self
    }
}

/// A Neutron security group with its rules
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecGroup {
    /// Group ID
    pub id: String,
    /// Group name, unique in the project
    pub name: String,
    /// Rules of the group
    pub rules: Vec<SecGroupRule>,
}

impl SecGroup {
    /// True when any rule carries `description`
    pub fn has_rules_described(&self, description: &str) -> bool {
        self.rules.iter().any(|r| r.description == description)
    }
}

/// A Nova server with the names of its security groups
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Server {
    /// Server ID
    pub id: String,
    /// Server name, same as the node name
    pub name: String,
    /// Names of the attached security groups
    pub security_groups: Vec<String>,
}

/// Networking and compute operations scoped to one project. Lookups by
/// name report a missing resource with HTTP status 404 and duplicate rules
/// with 409.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OpenStackApi: Send + Sync {
    /// Get a security group by name
    async fn get_security_group(&self, name: &str) -> Result<SecGroup, ApiError>;

    /// Create an empty security group
    async fn create_security_group(&self, name: &str, description: &str) -> Result<SecGroup, ApiError>;

    /// Delete a security group
    async fn delete_security_group(&self, id: &str) -> Result<(), ApiError>;

    /// Add a rule to the group named in `rule`
    async fn create_rule(&self, rule: SecGroupRule) -> Result<(), ApiError>;

    /// Delete a rule
    async fn delete_rule(&self, id: &str) -> Result<(), ApiError>;

    /// Get a server by name
    async fn get_server(&self, name: &str) -> Result<Server, ApiError>;

    /// Attach security group `group` to a server
    async fn add_server_security_group(&self, server_id: &str, group: &str) -> Result<(), ApiError>;

    /// Detach security group `group` from a server
    async fn remove_server_security_group(&self, server_id: &str, group: &str) -> Result<(), ApiError>;
}
