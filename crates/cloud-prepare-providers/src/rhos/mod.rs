//! Red Hat OpenStack adapter.
//!
//! Intra-cluster ports are opened in the `{infraID}-worker` and
//! `{infraID}-master` security groups. Gateways are labeled worker nodes
//! whose servers get the gateway security group `{infraID}-submariner-gw-sg`.

pub mod client;
mod gateway;

use async_trait::async_trait;
use tracing::{debug, info};

use cloud_prepare_common::{
    CloudConfig, Direction, Error, Naming, PortSpec, ProviderConfig, Result,
    INTERNAL_TRAFFIC_DESCRIPTION,
};
use cloud_prepare_gateway::{CloudPorts, CloudResource, Reconciled, ResourceKind, ResourceLocator};

pub use client::{OpenStackApi, SecGroup, SecGroupRule, Server};
pub use gateway::RhosGatewayProvider;

use crate::wrap;

pub(crate) const PROVIDER: &str = "rhos";

const PUBLIC_TRAFFIC_DESCRIPTION: &str = "Public Submariner traffic";
const GATEWAY_GROUP_DESCRIPTION: &str = "Submariner Gateway";
const ANY_ADDRESS: &str = "0.0.0.0/0";

/// One OpenStack cluster: its API client, project and naming
pub struct RhosCloud<C> {
    openstack: C,
    naming: Naming,
    project_id: String,
}

impl<C: OpenStackApi> RhosCloud<C> {
    /// Create the adapter for a cluster configured with the `rhos` provider
    pub fn new(openstack: C, config: &CloudConfig) -> Result<Self> {
        let ProviderConfig::Rhos(rhos) = &config.provider else {
            return Err(Error::config(format!(
                "expected rhos provider configuration, got {}",
                config.provider.name()
            )));
        };
        config.validate()?;
        Ok(Self {
            openstack,
            naming: config.naming(),
            project_id: rhos.project_id.clone(),
        })
    }

    /// Cluster naming
    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// Project the cluster runs in
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn find_group(&self, name: &str) -> Result<Option<SecGroup>> {
        match self.openstack.get_security_group(name).await {
            Ok(group) => Ok(Some(group)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(wrap(PROVIDER, "get security group", name)(e)),
        }
    }

    async fn required_group(&self, name: &str) -> Result<SecGroup> {
        self.find_group(name)
            .await?
            .ok_or_else(|| Error::not_found(ResourceKind::SecurityGroup.to_string(), name))
    }

    /// Create a rule; an identical existing rule counts as created
    async fn create_rule(&self, rule: SecGroupRule) -> Result<()> {
        let group = rule.security_group_id.clone();
        match self.openstack.create_rule(rule).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => {
                debug!(group = %group, "Security group rule already exists");
                Ok(())
            }
            Err(e) => Err(wrap(PROVIDER, "create security group rule in", &group)(e)),
        }
    }

    async fn delete_rules_described(&self, group: &SecGroup, description: &str) -> Result<usize> {
        let mut deleted = 0;
        for rule in group.rules.iter().filter(|r| r.description == description) {
            match self.openstack.delete_rule(&rule.id).await {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(wrap(PROVIDER, "delete security group rule", &rule.id)(e)),
            }
        }
        Ok(deleted)
    }

    /// Open `ports` from workers and masters to workers and masters
    pub async fn ensure_internal_rules(&self, ports: &[PortSpec]) -> Result<Reconciled> {
        let worker = self.required_group(&self.naming.with_suffix("worker")).await?;
        let master = self.required_group(&self.naming.with_suffix("master")).await?;
        if worker.has_rules_described(INTERNAL_TRAFFIC_DESCRIPTION) {
            debug!(group = %worker.name, "Internal rules already present");
            return Ok(Reconciled::Noop);
        }

        for target in [&worker, &master] {
            for port in ports {
                for source in [&worker, &master] {
                    let rule = SecGroupRule::new(
                        &target.id,
                        Direction::Ingress,
                        *port,
                        INTERNAL_TRAFFIC_DESCRIPTION,
                    )
                    .from_group(&source.id);
                    self.create_rule(rule).await?;
                }
            }
        }
        info!(ports = ports.len(), "Opened internal ports between workers and masters");
        Ok(Reconciled::Applied)
    }

    /// Delete the internal rules from both node groups
    pub async fn remove_internal_rules(&self) -> Result<Reconciled> {
        let mut deleted = 0;
        for suffix in ["worker", "master"] {
            if let Some(group) = self.find_group(&self.naming.with_suffix(suffix)).await? {
                deleted += self
                    .delete_rules_described(&group, INTERNAL_TRAFFIC_DESCRIPTION)
                    .await?;
            }
        }
        Ok(if deleted > 0 {
            Reconciled::Applied
        } else {
            Reconciled::Noop
        })
    }

    /// Create the gateway group with public ingress rules
    pub(crate) async fn ensure_gateway_group(&self, ports: &[PortSpec]) -> Result<Reconciled> {
        let name = self.naming.gateway_security_group();
        let group = match self.find_group(&name).await? {
            Some(group) if group.has_rules_described(PUBLIC_TRAFFIC_DESCRIPTION) => {
                return Ok(Reconciled::Noop);
            }
            Some(group) => group,
            None => {
                let group = self
                    .openstack
                    .create_security_group(&name, GATEWAY_GROUP_DESCRIPTION)
                    .await
                    .map_err(wrap(PROVIDER, "create security group", &name))?;
                info!(group = %name, "Created gateway security group");
                group
            }
        };

        for port in ports {
            let rule = SecGroupRule::new(&group.id, Direction::Ingress, *port, PUBLIC_TRAFFIC_DESCRIPTION)
                .from_prefix(ANY_ADDRESS);
            self.create_rule(rule).await?;
        }
        Ok(Reconciled::Applied)
    }

    pub(crate) async fn delete_gateway_group(&self) -> Result<Reconciled> {
        let name = self.naming.gateway_security_group();
        let Some(group) = self.find_group(&name).await? else {
            return Ok(Reconciled::Noop);
        };
        match self.openstack.delete_security_group(&group.id).await {
            Ok(()) => {
                info!(group = %name, "Deleted gateway security group");
                Ok(Reconciled::Applied)
            }
            Err(e) if e.is_not_found() => Ok(Reconciled::Noop),
            Err(e) => Err(wrap(PROVIDER, "delete security group", &name)(e)),
        }
    }

    /// Add the gateway group to the server backing `node`
    pub(crate) async fn attach_gateway_group(&self, node: &str) -> Result<()> {
        let group = self.naming.gateway_security_group();
        let server = self
            .openstack
            .get_server(node)
            .await
            .map_err(wrap(PROVIDER, "get server", node))?;
        if server.security_groups.contains(&group) {
            return Ok(());
        }
        self.openstack
            .add_server_security_group(&server.id, &group)
            .await
            .map_err(wrap(PROVIDER, "add security group to server", node))
    }

    /// Remove the gateway group from the server backing `node`, if attached
    pub(crate) async fn detach_gateway_group(&self, node: &str) -> Result<()> {
        let group = self.naming.gateway_security_group();
        let server = match self.openstack.get_server(node).await {
            Ok(server) => server,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(wrap(PROVIDER, "get server", node)(e)),
        };
        if !server.security_groups.contains(&group) {
            return Ok(());
        }
        match self
            .openstack
            .remove_server_security_group(&server.id, &group)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(wrap(PROVIDER, "remove security group from server", node)(e)),
        }
    }
}

#[async_trait]
impl<C: OpenStackApi> ResourceLocator for RhosCloud<C> {
    async fn find_by_name(&self, kind: ResourceKind, name: &str) -> Result<Option<CloudResource>> {
        match kind {
            ResourceKind::SecurityGroup => Ok(self
                .find_group(name)
                .await?
                .map(|g| CloudResource::new(g.id, g.name))),
            ResourceKind::Instance => match self.openstack.get_server(name).await {
                Ok(server) => Ok(Some(CloudResource::new(server.id, server.name))),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(wrap(PROVIDER, "get server", name)(e)),
            },
            other => Err(Error::unsupported(format!("rhos cannot look up {other} by name"))),
        }
    }

    async fn find_by_tag(&self, kind: ResourceKind, _tag_prefix: &str) -> Result<Vec<CloudResource>> {
        Err(Error::unsupported(format!("rhos cannot look up {kind} by tag")))
    }
}

#[async_trait]
impl<C: OpenStackApi> CloudPorts for RhosCloud<C> {
    async fn open_ports(&self, ports: &[PortSpec]) -> Result<()> {
        self.ensure_internal_rules(ports).await.map(|_| ())
    }

    async fn close_ports(&self) -> Result<()> {
        self.remove_internal_rules().await.map(|_| ())
    }
}


#[cfg(test)]
mod tests {
    use super::client::MockOpenStackApi;
    use super::testing::*;
    use super::*;
    use cloud_prepare_common::ApiError;

    fn internal_rule(id: &str) -> SecGroupRule {
        SecGroupRule {
            id: id.to_string(),
            ..SecGroupRule::new("abc-worker-id", Direction::Ingress, PortSpec::udp(4800), INTERNAL_TRAFFIC_DESCRIPTION)
        }
    }

    /// Story: opening one port adds four rules, each node group admitting
    /// traffic from both node groups; a duplicate is tolerated
    #[tokio::test]
    async fn story_open_ports_between_node_groups() {
        let mut openstack = MockOpenStackApi::new();
        expect_node_groups(&mut openstack, vec![]);
        openstack
            .expect_create_rule()
            .withf(|rule| {
                rule.direction == "ingress"
                    && rule.protocol == "udp"
                    && rule.port_range_min == 4800
                    && rule.port_range_max == 4800
                    && rule.description == INTERNAL_TRAFFIC_DESCRIPTION
                    && rule.remote_group_id.is_some()
            })
            .times(4)
            .returning(|rule| {
                if rule.security_group_id == "abc-master-id"
                    && rule.remote_group_id.as_deref() == Some("abc-master-id")
                {
                    Err(ApiError::new("SecurityGroupRuleExists", "exists").with_status(409))
                } else {
                    Ok(())
                }
            });

        let outcome = cloud(openstack)
            .ensure_internal_rules(&[PortSpec::udp(4800)])
            .await
            .unwrap();
        assert_eq!(outcome, Reconciled::Applied);
    }

    #[tokio::test]
    async fn test_open_ports_twice_is_noop() {
        let mut openstack = MockOpenStackApi::new();
        expect_node_groups(&mut openstack, vec![internal_rule("r1")]);
        openstack.expect_create_rule().never();

        let outcome = cloud(openstack)
            .ensure_internal_rules(&[PortSpec::udp(4800)])
            .await
            .unwrap();
        assert_eq!(outcome, Reconciled::Noop);
    }

    #[tokio::test]
    async fn test_missing_master_group_is_not_found() {
        let mut openstack = MockOpenStackApi::new();
        openstack.expect_get_security_group().returning(|name| match name {
            "abc-worker" => Ok(group(name, vec![])),
            _ => Err(ApiError::not_found(name)),
        });
        openstack.expect_create_rule().never();

        let err = cloud(openstack)
            .open_ports(&[PortSpec::udp(4800)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { ref name, .. } if name == "abc-master"));
    }

    #[tokio::test]
    async fn test_close_ports_deletes_only_internal_rules() {
        let mut unrelated = internal_rule("ssh");
        unrelated.description = "ssh".to_string();
        let mut openstack = MockOpenStackApi::new();
        expect_node_groups(&mut openstack, vec![unrelated, internal_rule("r1"), internal_rule("r2")]);
        openstack
            .expect_delete_rule()
            .withf(|id| id == "r1" || id == "r2")
            .times(2)
            .returning(|id| {
                if id == "r2" {
                    Err(ApiError::not_found(id))
                } else {
                    Ok(())
                }
            });

        cloud(openstack).close_ports().await.unwrap();
    }

    #[tokio::test]
    async fn test_gateway_group_created_with_public_rules() {
        let mut openstack = MockOpenStackApi::new();
        openstack
            .expect_get_security_group()
            .returning(|name| Err(ApiError::not_found(name)));
        openstack
            .expect_create_security_group()
            .withf(|name, description| name == GATEWAY_SG && description == GATEWAY_GROUP_DESCRIPTION)
            .times(1)
            .returning(|name, _| Ok(group(name, vec![])));
        openstack
            .expect_create_rule()
            .withf(|rule| {
                rule.security_group_id == "abc-submariner-gw-sg-id"
                    && rule.remote_ip_prefix.as_deref() == Some(ANY_ADDRESS)
            })
            .times(2)
            .returning(|_| Ok(()));

        let outcome = cloud(openstack)
            .ensure_gateway_group(&[PortSpec::udp(4500), PortSpec::udp(4490)])
            .await
            .unwrap();
        assert_eq!(outcome, Reconciled::Applied);
    }

    #[tokio::test]
    async fn test_detach_skips_servers_without_the_group() {
        let mut openstack = MockOpenStackApi::new();
        openstack
            .expect_get_server()
            .returning(|name| match name {
                "worker-a" => Ok(server(name, &["abc-worker"])),
                _ => Err(ApiError::not_found(name)),
            });
        openstack.expect_remove_server_security_group().never();

        let rhos = cloud(openstack);
        rhos.detach_gateway_group("worker-a").await.unwrap();
        rhos.detach_gateway_group("worker-gone").await.unwrap();
    }

    #[tokio::test]
    async fn test_servers_are_located_by_name() {
        let mut openstack = MockOpenStackApi::new();
        openstack
            .expect_get_server()
            .returning(|name| Ok(server(name, &[])));

        let found = cloud(openstack)
            .find_by_name(ResourceKind::Instance, "worker-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "worker-a-uuid");
        assert_eq!(found.name, "worker-a");
    }
}
