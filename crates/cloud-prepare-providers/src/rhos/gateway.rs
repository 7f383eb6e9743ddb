//! RHOS gateways: labeled worker nodes carrying the gateway security group.

use async_trait::async_trait;
use tracing::info;

use cloud_prepare_common::{
    Error, GatewayDeployRequest, GatewayMode, GatewayResource, PortSpec, Result, RuleSetKind,
};
use cloud_prepare_gateway::{GatewayProvider, Placement, Reconciled};
use cloud_prepare_k8s::nodes::NON_GATEWAY_SELECTOR;
use cloud_prepare_k8s::{gateway_candidates, NodeClient};

use super::client::OpenStackApi;
use super::{RhosCloud, PROVIDER};

/// Gateways as labeled worker nodes carrying the gateway security group
pub struct RhosGatewayProvider<C, N> {
    cloud: RhosCloud<C>,
    nodes: N,
}

impl<C: OpenStackApi, N: NodeClient> RhosGatewayProvider<C, N> {
    /// Create a provider labeling nodes through `nodes`
    pub fn new(cloud: RhosCloud<C>, nodes: N) -> Self {
        Self { cloud, nodes }
    }

    /// The underlying cluster adapter
    pub fn cloud(&self) -> &RhosCloud<C> {
        &self.cloud
    }
}

#[async_trait]
impl<C: OpenStackApi, N: NodeClient> GatewayProvider for RhosGatewayProvider<C, N> {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn supports(&self, mode: GatewayMode) -> bool {
        mode == GatewayMode::Labeled
    }

    async fn locate_existing(&self) -> Result<Vec<GatewayResource>> {
        let nodes = self.nodes.list_gateway_nodes().await?;
        Ok(nodes
            .into_iter()
            .map(|n| GatewayResource::labeled(n.name, n.zone))
            .collect())
    }

    async fn ensure_rule_set(&self, kind: RuleSetKind, ports: &[PortSpec]) -> Result<Reconciled> {
        match kind {
            RuleSetKind::Internal => self.cloud.ensure_internal_rules(ports).await,
            RuleSetKind::External => self.cloud.ensure_gateway_group(ports).await,
        }
    }

    /// The gateway group is detached from every gateway server before it
    /// is deleted
    async fn remove_rule_set(&self, kind: RuleSetKind) -> Result<Reconciled> {
        match kind {
            RuleSetKind::Internal => self.cloud.remove_internal_rules().await,
            RuleSetKind::External => {
                for node in self.nodes.list_gateway_nodes().await? {
                    self.cloud.detach_gateway_group(&node.name).await?;
                }
                self.cloud.delete_gateway_group().await
            }
        }
    }

    async fn resolve_placement(
        &self,
        _mode: GatewayMode,
        _existing: &[GatewayResource],
    ) -> Result<Vec<Placement>> {
        let nodes = self.nodes.list_nodes(NON_GATEWAY_SELECTOR).await?;
        Ok(gateway_candidates(nodes)
            .into_iter()
            .map(|n| Placement::node(n.name, n.zone))
            .collect())
    }

    async fn create_gateway(
        &self,
        placement: &Placement,
        _request: &GatewayDeployRequest,
    ) -> Result<GatewayResource> {
        let Placement::Node { name, zone } = placement else {
            return Err(Error::unsupported("rhos gateways can only be placed on nodes"));
        };
        self.cloud.attach_gateway_group(name).await?;
        self.nodes.add_gateway_label(name).await?;
        info!(node = %name, "Configured worker node as gateway");
        Ok(GatewayResource::labeled(name.clone(), zone.clone()))
    }

    async fn delete_gateway(&self, gateway: &GatewayResource) -> Result<()> {
        self.cloud.detach_gateway_group(&gateway.name).await?;
        self.nodes.remove_gateway_label(&gateway.name).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::client::MockOpenStackApi;
    use super::super::testing::*;
    use super::*;
    use cloud_prepare_common::{ApiError, NoopReporter};
    use cloud_prepare_gateway::{DeployOutcome, GatewayLifecycleManager};
    use cloud_prepare_k8s::{MockNodeClient, NodeInfo};
    use mockall::predicate::eq;

    fn node(name: &str) -> NodeInfo {
        NodeInfo {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Story: one gateway is requested; the gateway group is created with
    /// the public port, attached to the first worker's server and the
    /// worker is labeled
    #[tokio::test]
    async fn story_labels_worker_with_gateway_group() {
        let mut openstack = MockOpenStackApi::new();
        openstack
            .expect_get_security_group()
            .with(eq(GATEWAY_SG))
            .returning(|name| Err(ApiError::not_found(name)));
        openstack
            .expect_create_security_group()
            .times(1)
            .returning(|name, _| Ok(group(name, vec![])));
        openstack.expect_create_rule().times(1).returning(|_| Ok(()));
        openstack
            .expect_get_server()
            .with(eq("worker-a"))
            .returning(|name| Ok(server(name, &["abc-worker"])));
        openstack
            .expect_add_server_security_group()
            .with(eq("worker-a-uuid"), eq(GATEWAY_SG))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut nodes = MockNodeClient::new();
        nodes.expect_list_gateway_nodes().returning(|| Ok(vec![]));
        nodes
            .expect_list_nodes()
            .with(eq(NON_GATEWAY_SELECTOR))
            .returning(|_| Ok(vec![node("worker-a"), node("worker-b")]));
        nodes
            .expect_add_gateway_label()
            .with(eq("worker-a"))
            .times(1)
            .returning(|_| Ok(()));

        let manager = GatewayLifecycleManager::new(
            RhosGatewayProvider::new(cloud(openstack), nodes),
            Arc::new(NoopReporter),
        );
        let request = GatewayDeployRequest::new(1).with_public_ports([PortSpec::udp(4500)]);
        let outcome = manager.deploy(&request).await.unwrap();
        assert!(matches!(outcome, DeployOutcome::ScaledUp { ref created } if created[0].name == "worker-a"));
    }

    #[tokio::test]
    async fn test_dedicated_mode_is_rejected_before_any_call() {
        let manager = GatewayLifecycleManager::new(
            RhosGatewayProvider::new(cloud(MockOpenStackApi::new()), MockNodeClient::new()),
            Arc::new(NoopReporter),
        );

        let err = manager
            .deploy(&GatewayDeployRequest::new(1).dedicated())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    /// Story: cleanup detaches the group from every gateway server,
    /// deletes it, unlabels the gateways and closes the internal ports
    #[tokio::test]
    async fn story_cleanup_detaches_before_delete() {
        let mut openstack = MockOpenStackApi::new();
        let mut attached = true;
        openstack.expect_get_server().returning(move |name| {
            let groups: &[&str] = if attached {
                &["abc-worker", GATEWAY_SG]
            } else {
                &["abc-worker"]
            };
            attached = false;
            Ok(server(name, groups))
        });
        openstack
            .expect_remove_server_security_group()
            .with(eq("worker-a-uuid"), eq(GATEWAY_SG))
            .times(1)
            .returning(|_, _| Ok(()));
        openstack.expect_get_security_group().returning(|name| Ok(group(name, vec![])));
        openstack
            .expect_delete_security_group()
            .with(eq("abc-submariner-gw-sg-id"))
            .times(1)
            .returning(|_| Ok(()));

        let mut nodes = MockNodeClient::new();
        nodes
            .expect_list_gateway_nodes()
            .returning(|| Ok(vec![node("worker-a")]));
        nodes
            .expect_remove_gateway_label()
            .with(eq("worker-a"))
            .times(1)
            .returning(|_| Ok(()));

        let manager = GatewayLifecycleManager::new(
            RhosGatewayProvider::new(cloud(openstack), nodes),
            Arc::new(NoopReporter),
        );
        manager.cleanup().await.unwrap();
    }
}
