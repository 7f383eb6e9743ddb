//! The slice of the Azure network and compute APIs used by the Azure adapter.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use cloud_prepare_common::{ApiError, SecurityRule};

/// Resource type of virtual machine SKUs
pub const VIRTUAL_MACHINES: &str = "virtualMachines";

/// A network security group with its rules and attached interfaces
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkSecurityGroup {
    /// Group name
    pub name: String,
    /// ARM resource ID; empty until created
    pub id: String,
    /// Azure region
    pub location: String,
    /// Security rules, inbound and outbound
    pub rules: Vec<SecurityRule>,
    /// Resource IDs of the NICs using this group
    pub network_interfaces: Vec<String>,
}

/// A virtual machine network interface
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkInterface {
    /// NIC name, `{node}-nic` for cluster nodes
    pub name: String,
    /// ARM resource ID
    pub id: String,
    /// Resource ID of the attached security group
    pub security_group: Option<String>,
}

/// A compute SKU with the zones of the region it is offered in
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceSku {
    /// SKU name, e.g. `Standard_D4s_v3`
    pub name: String,
    /// `virtualMachines` for VM sizes
    pub resource_type: String,
    /// Zones offering the SKU
    pub zones: Vec<String>,
}

/// Last path segment of an ARM resource ID
pub fn resource_name(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Network and compute operations for one subscription. Implementations
/// poll long-running operations until they finish and report missing
/// resources with HTTP status 404.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AzureNetworkApi: Send + Sync {
    /// Get a security group
    async fn get_security_group(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<NetworkSecurityGroup, ApiError>;

    /// Create the group or replace its rules; returns the stored group
    async fn create_or_update_security_group(
        &self,
        resource_group: &str,
        group: NetworkSecurityGroup,
    ) -> Result<NetworkSecurityGroup, ApiError>;

    /// Delete a security group
    async fn delete_security_group(&self, resource_group: &str, name: &str) -> Result<(), ApiError>;

    /// Get a network interface
    async fn get_network_interface(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<NetworkInterface, ApiError>;

    /// Replace a network interface
    async fn update_network_interface(
        &self,
        resource_group: &str,
        nic: NetworkInterface,
    ) -> Result<(), ApiError>;

    /// SKUs available in `location`
    async fn list_resource_skus(&self, location: &str) -> Result<Vec<ResourceSku>, ApiError>;
}
