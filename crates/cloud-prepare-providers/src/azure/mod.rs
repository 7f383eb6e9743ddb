//! Azure adapter.
//!
//! Intra-cluster ports are opened in the cluster NSG `{infraID}-nsg`;
//! gateway ports live in a separate NSG `{infraID}-submariner-external-sg`
//! attached to gateway NICs. Gateways are either dedicated machine sets in
//! the availability zones offering the instance type, or labeled worker
//! nodes.

pub mod client;
mod gateway;
mod nsg;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use cloud_prepare_common::config::GatewayConfig;
use cloud_prepare_common::{
    CloudConfig, Error, Naming, PortSpec, ProviderConfig, Result, RuleSetKind,
};
use cloud_prepare_gateway::{
    require, CloudPorts, CloudResource, Reconciled, ResourceKind, ResourceLocator, RuleReconciler,
};

pub use client::{AzureNetworkApi, NetworkInterface, NetworkSecurityGroup, ResourceSku};
pub use gateway::{AzureGatewayProvider, DEFAULT_INSTANCE_TYPE};
pub use nsg::NsgStore;

use crate::wrap;

pub(crate) const PROVIDER: &str = "azure";

const INTERNAL_BASE_PRIORITY: u32 = 2500;
const EXTERNAL_BASE_PRIORITY: u32 = 3500;
const EXTERNAL_GROUP_SUFFIX: &str = "submariner-external-sg";

/// One Azure cluster: its network client, resource group and naming
pub struct AzureCloud<C> {
    network: Arc<C>,
    rules: RuleReconciler<NsgStore<C>>,
    naming: Naming,
    resource_group: String,
    gateway: GatewayConfig,
}

impl<C: AzureNetworkApi> AzureCloud<C> {
    /// Create the adapter for a cluster configured with the `azure` provider
    pub fn new(network: C, config: &CloudConfig) -> Result<Self> {
        let ProviderConfig::Azure(azure) = &config.provider else {
            return Err(Error::config(format!(
                "expected azure provider configuration, got {}",
                config.provider.name()
            )));
        };
        config.validate()?;

        let naming = config.naming();
        let resource_group = azure
            .resource_group
            .clone()
            .unwrap_or_else(|| naming.with_suffix("rg"));
        let network = Arc::new(network);
        let store = NsgStore::new(Arc::clone(&network), &resource_group, naming.region());
        Ok(Self {
            network,
            rules: RuleReconciler::new(store),
            naming,
            resource_group,
            gateway: config.gateway.clone(),
        })
    }

    /// Cluster naming
    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// Resource group holding the cluster network
    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    fn internal_group(&self) -> String {
        self.naming.with_suffix("nsg")
    }

    fn external_group(&self) -> String {
        self.naming.with_suffix(EXTERNAL_GROUP_SUFFIX)
    }

    /// Open `ports` in the cluster NSG, which must already exist
    pub async fn ensure_internal_rules(&self, ports: &[PortSpec]) -> Result<Reconciled> {
        let group = self.internal_group();
        require(self, ResourceKind::SecurityGroup, &group).await?;
        let desired = nsg::managed_rules(RuleSetKind::Internal, ports, INTERNAL_BASE_PRIORITY);
        let outcome = self
            .rules
            .ensure_rule_set(&group, RuleSetKind::Internal.prefix(), desired)
            .await?;
        info!(group = %group, outcome = ?outcome, "Reconciled internal NSG rules");
        Ok(outcome)
    }

    /// Remove the managed internal rules, keeping the installer's
    pub async fn remove_internal_rules(&self) -> Result<Reconciled> {
        self.rules
            .remove_rules_by_prefix(&self.internal_group(), RuleSetKind::Internal.prefix())
            .await
    }

    /// Create the gateway NSG with public rules when it does not exist
    pub(crate) async fn ensure_external_group(&self, ports: &[PortSpec]) -> Result<Reconciled> {
        let desired = nsg::managed_rules(RuleSetKind::External, ports, EXTERNAL_BASE_PRIORITY);
        self.rules
            .ensure_rule_set(&self.external_group(), RuleSetKind::External.prefix(), desired)
            .await
    }

    /// Detach the gateway NSG from every NIC, then delete it
    pub(crate) async fn delete_external_group(&self) -> Result<Reconciled> {
        let group = self.external_group();
        let Some(existing) = self.get_group(&group).await? else {
            debug!(group = %group, "Gateway NSG does not exist");
            return Ok(Reconciled::Noop);
        };
        for nic_id in &existing.network_interfaces {
            self.detach_interface(client::resource_name(nic_id), &existing.id)
                .await?;
        }
        self.rules.delete_group(&group).await
    }

    async fn get_group(&self, name: &str) -> Result<Option<NetworkSecurityGroup>> {
        match self.network.get_security_group(&self.resource_group, name).await {
            Ok(group) => Ok(Some(group)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(wrap(PROVIDER, "get security group", name)(e)),
        }
    }

    /// Resource ID of the gateway NSG
    pub(crate) async fn external_group_id(&self) -> Result<String> {
        let resource = require(self, ResourceKind::SecurityGroup, &self.external_group()).await?;
        Ok(resource.id)
    }

    /// Attach the NSG `group_id` to the NIC of `node`
    pub(crate) async fn attach_node_interface(&self, node: &str, group_id: &str) -> Result<()> {
        let name = format!("{node}-nic");
        let mut nic = self
            .network
            .get_network_interface(&self.resource_group, &name)
            .await
            .map_err(wrap(PROVIDER, "get network interface", &name))?;
        if nic.security_group.as_deref() == Some(group_id) {
            return Ok(());
        }
        nic.security_group = Some(group_id.to_string());
        self.network
            .update_network_interface(&self.resource_group, nic)
            .await
            .map_err(wrap(PROVIDER, "attach security group to", &name))?;
        info!(nic = %name, "Attached gateway NSG");
        Ok(())
    }

    /// Clear the NSG of NIC `name` when it is `group_id`; a missing NIC is fine
    pub(crate) async fn detach_interface(&self, name: &str, group_id: &str) -> Result<()> {
        let mut nic = match self
            .network
            .get_network_interface(&self.resource_group, name)
            .await
        {
            Ok(nic) => nic,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(wrap(PROVIDER, "get network interface", name)(e)),
        };
        if nic.security_group.as_deref() != Some(group_id) {
            return Ok(());
        }
        nic.security_group = None;
        self.network
            .update_network_interface(&self.resource_group, nic)
            .await
            .map_err(wrap(PROVIDER, "detach security group from", name))?;
        info!(nic = %name, "Detached gateway NSG");
        Ok(())
    }

    /// Zones of the region offering virtual machine SKU `instance_type`
    pub(crate) async fn offered_zones(&self, instance_type: &str) -> Result<Vec<String>> {
        let skus = self
            .network
            .list_resource_skus(self.naming.region())
            .await
            .map_err(wrap(PROVIDER, "list resource skus", self.naming.region()))?;
        let mut zones: Vec<String> = skus
            .into_iter()
            .filter(|s| s.resource_type == client::VIRTUAL_MACHINES && s.name == instance_type)
            .flat_map(|s| s.zones)
            .collect();
        zones.sort();
        zones.dedup();
        Ok(zones)
    }
}

#[async_trait]
impl<C: AzureNetworkApi> ResourceLocator for AzureCloud<C> {
    async fn find_by_name(&self, kind: ResourceKind, name: &str) -> Result<Option<CloudResource>> {
        match kind {
            ResourceKind::SecurityGroup => Ok(self
                .get_group(name)
                .await?
                .map(|g| CloudResource::new(g.id, g.name))),
            other => Err(Error::unsupported(format!("azure cannot look up {other} by name"))),
        }
    }

    async fn find_by_tag(&self, kind: ResourceKind, _tag_prefix: &str) -> Result<Vec<CloudResource>> {
        Err(Error::unsupported(format!("azure cannot look up {kind} by tag")))
    }
}

#[async_trait]
impl<C: AzureNetworkApi> CloudPorts for AzureCloud<C> {
    async fn open_ports(&self, ports: &[PortSpec]) -> Result<()> {
        self.ensure_internal_rules(ports).await.map(|_| ())
    }

    async fn close_ports(&self) -> Result<()> {
        self.remove_internal_rules().await.map(|_| ())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for the Azure tests

    use super::client::*;
    use super::*;
    use cloud_prepare_common::config::AzureConfig;

    pub const RG: &str = "abc-rg";
    pub const EXTERNAL_NSG: &str = "abc-submariner-external-sg";
    pub const EXTERNAL_NSG_ID: &str = "/subscriptions/sub/resourceGroups/abc-rg/providers/Microsoft.Network/networkSecurityGroups/abc-submariner-external-sg";

    pub fn config() -> CloudConfig {
        CloudConfig::new(
            "abc",
            "eastus",
            ProviderConfig::Azure(AzureConfig {
                subscription_id: "sub".into(),
                resource_group: None,
            }),
        )
    }

    pub fn cloud(network: MockAzureNetworkApi) -> AzureCloud<MockAzureNetworkApi> {
        AzureCloud::new(network, &config()).unwrap()
    }

    pub fn security_group(name: &str, rules: Vec<cloud_prepare_common::SecurityRule>) -> NetworkSecurityGroup {
        NetworkSecurityGroup {
            name: name.to_string(),
            id: format!("/subscriptions/sub/resourceGroups/abc-rg/providers/Microsoft.Network/networkSecurityGroups/{name}"),
            location: "eastus".to_string(),
            rules,
            network_interfaces: vec![],
        }
    }

    pub fn nic(node: &str, group: Option<&str>) -> NetworkInterface {
        NetworkInterface {
            name: format!("{node}-nic"),
            id: format!("/subscriptions/sub/resourceGroups/abc-rg/providers/Microsoft.Network/networkInterfaces/{node}-nic"),
            security_group: group.map(str::to_string),
        }
    }

    pub fn sku(name: &str, zones: &[&str]) -> ResourceSku {
        ResourceSku {
            name: name.to_string(),
            resource_type: VIRTUAL_MACHINES.to_string(),
            zones: zones.iter().map(|z| z.to_string()).collect(),
        }
    }
}
