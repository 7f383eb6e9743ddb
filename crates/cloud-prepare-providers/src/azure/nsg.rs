//! Network security groups as a [`RuleStore`].

use std::sync::Arc;

use async_trait::async_trait;

use cloud_prepare_common::{
    Direction, PortSpec, Result, RuleGroup, RuleSetKind, SecurityRule,
};
use cloud_prepare_gateway::RuleStore;

use super::client::{AzureNetworkApi, NetworkSecurityGroup};
use super::PROVIDER;
use crate::wrap;

const ALL_NETWORKS: &str = "0.0.0.0/0";

/// Inbound and outbound rules per port; both directions of port `i` share
/// priority `base + i`
pub(crate) fn managed_rules(kind: RuleSetKind, ports: &[PortSpec], base: u32) -> Vec<SecurityRule> {
    let mut rules = Vec::with_capacity(ports.len() * 2);
    for direction in [Direction::Ingress, Direction::Egress] {
        for (priority, port) in (base..).zip(ports) {
            rules.push(
                SecurityRule::managed(kind, *port, direction)
                    .with_priority(priority)
                    .with_address_prefix(ALL_NETWORKS),
            );
        }
    }
    rules
}

/// NSGs of one resource group
pub struct NsgStore<C> {
    network: Arc<C>,
    resource_group: String,
    location: String,
}

impl<C: AzureNetworkApi> NsgStore<C> {
    /// Store for `resource_group`, creating new groups in `location`
    pub fn new(network: Arc<C>, resource_group: &str, location: &str) -> Self {
        Self {
            network,
            resource_group: resource_group.to_string(),
            location: location.to_string(),
        }
    }

    async fn save(&self, group: NetworkSecurityGroup, operation: &str) -> Result<()> {
        let name = group.name.clone();
        self.network
            .create_or_update_security_group(&self.resource_group, group)
            .await
            .map_err(wrap(PROVIDER, operation, &name))?;
        Ok(())
    }
}

#[async_trait]
impl<C: AzureNetworkApi> RuleStore for NsgStore<C> {
    async fn fetch(&self, group: &str) -> Result<Option<RuleGroup>> {
        match self.network.get_security_group(&self.resource_group, group).await {
            Ok(nsg) => Ok(Some(RuleGroup {
                name: nsg.name,
                id: Some(nsg.id),
                rules: nsg.rules,
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(wrap(PROVIDER, "get security group", group)(e)),
        }
    }

    async fn create_group(&self, group: &RuleGroup) -> Result<()> {
        let nsg = NetworkSecurityGroup {
            name: group.name.clone(),
            location: self.location.clone(),
            rules: group.rules.clone(),
            ..Default::default()
        };
        self.save(nsg, "create security group").await
    }

    async fn replace_rules(&self, group: &RuleGroup) -> Result<()> {
        // re-read so NIC attachments survive the update
        let mut nsg = self
            .network
            .get_security_group(&self.resource_group, &group.name)
            .await
            .map_err(wrap(PROVIDER, "get security group", &group.name))?;
        nsg.rules = group.rules.clone();
        self.save(nsg, "update security group").await
    }

    async fn delete_group(&self, group: &str) -> Result<()> {
        match self
            .network
            .delete_security_group(&self.resource_group, group)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(wrap(PROVIDER, "delete security group", group)(e)),
        }
    }
}
