//! Kubernetes-only provider: gateways are worker nodes carrying the gateway label.
//!
//! There is no cloud API behind this provider, so rule sets are always in
//! place and only labeled mode is available.

use async_trait::async_trait;
use tracing::{debug, info};

use cloud_prepare_common::{
    Error, GatewayDeployRequest, GatewayMode, GatewayResource, PortSpec, Result, RuleSetKind,
};
use cloud_prepare_gateway::{GatewayProvider, Placement, Reconciled};
use cloud_prepare_k8s::nodes::NON_GATEWAY_SELECTOR;
use cloud_prepare_k8s::{gateway_candidates, NodeClient};

/// Gateway provider for clusters without a supported cloud
pub struct GenericGatewayProvider<N> {
    nodes: N,
}

impl<N: NodeClient> GenericGatewayProvider<N> {
    /// Create a provider over a node client
    pub fn new(nodes: N) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl<N: NodeClient> GatewayProvider for GenericGatewayProvider<N> {
    fn name(&self) -> &'static str {
        "generic"
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

    async fn ensure_rule_set(&self, _kind: RuleSetKind, _ports: &[PortSpec]) -> Result<Reconciled> {
        Ok(Reconciled::Noop)
    }

    async fn remove_rule_set(&self, _kind: RuleSetKind) -> Result<Reconciled> {
        Ok(Reconciled::Noop)
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
            return Err(Error::unsupported("generic gateways can only be placed on nodes"));
        };
        self.nodes.add_gateway_label(name).await?;
        Ok(GatewayResource::labeled(name.clone(), zone.clone()))
    }

    async fn delete_gateway(&self, gateway: &GatewayResource) -> Result<()> {
        self.nodes.remove_gateway_label(&gateway.name).await
    }

    async fn finish_cleanup(&self) -> Result<()> {
        // nodes labeled with a value other than "true" are not listed as gateways
        let swept = self.nodes.remove_gateway_label_from_all().await?;
        if swept > 0 {
            info!(nodes = swept, "Removed leftover gateway labels");
        } else {
            debug!("No leftover gateway labels");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cloud_prepare_common::{NoopReporter, GATEWAY_LABEL, GATEWAY_LABEL_VALUE};
    use cloud_prepare_gateway::{DeployOutcome, GatewayLifecycleManager};
    use cloud_prepare_k8s::{MockNodeClient, NodeInfo};
    use mockall::predicate::eq;

    fn node(name: &str, control_plane: bool, gateway: bool) -> NodeInfo {
        let mut info = NodeInfo {
            name: name.to_string(),
            control_plane,
            ..Default::default()
        };
        if gateway {
            info.labels
                .insert(GATEWAY_LABEL.to_string(), GATEWAY_LABEL_VALUE.to_string());
        }
        info
    }

    fn manager(nodes: MockNodeClient) -> GatewayLifecycleManager<GenericGatewayProvider<MockNodeClient>> {
        GatewayLifecycleManager::new(GenericGatewayProvider::new(nodes), Arc::new(NoopReporter))
    }

    /// Story: two gateways are requested on a cluster with one master and
    /// two workers; both workers get labeled and the master is skipped
    #[tokio::test]
    async fn story_labels_workers_and_skips_masters() {
        let mut nodes = MockNodeClient::new();
        nodes.expect_list_gateway_nodes().returning(|| Ok(vec![]));
        nodes
            .expect_list_nodes()
            .with(eq(NON_GATEWAY_SELECTOR))
            .returning(|_| {
                Ok(vec![
                    node("master-0", true, false),
                    node("worker-0", false, false),
                    node("worker-1", false, false),
                ])
            });
        nodes
            .expect_add_gateway_label()
            .with(eq("worker-0"))
            .times(1)
            .returning(|_| Ok(()));
        nodes
            .expect_add_gateway_label()
            .with(eq("worker-1"))
            .times(1)
            .returning(|_| Ok(()));

        let outcome = manager(nodes)
            .deploy(&GatewayDeployRequest::new(2))
            .await
            .unwrap();
        assert!(matches!(outcome, DeployOutcome::ScaledUp { ref created } if created.len() == 2));
    }

    #[tokio::test]
    async fn test_not_enough_workers_is_capacity_error() {
        let mut nodes = MockNodeClient::new();
        nodes.expect_list_gateway_nodes().returning(|| Ok(vec![]));
        nodes
            .expect_list_nodes()
            .returning(|_| Ok(vec![node("master-0", true, false), node("worker-0", false, false)]));
        nodes
            .expect_add_gateway_label()
            .times(1)
            .returning(|_| Ok(()));

        let err = manager(nodes)
            .deploy(&GatewayDeployRequest::new(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityInsufficient { ref resource, requested: 2, placed: 1 } if resource == "worker nodes"
        ));
    }

    #[tokio::test]
    async fn test_scale_down_leaves_labels_alone() {
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_list_gateway_nodes()
            .returning(|| Ok(vec![node("worker-0", false, true), node("worker-1", false, true)]));
        nodes.expect_remove_gateway_label().never();
        nodes.expect_add_gateway_label().never();

        let outcome = manager(nodes)
            .deploy(&GatewayDeployRequest::new(1))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DeployOutcome::ScaleDownRejected {
                current: 2,
                desired: 1
            }
        );
    }

    #[tokio::test]
    async fn test_dedicated_mode_is_unsupported() {
        let nodes = MockNodeClient::new();
        let err = manager(nodes)
            .deploy(&GatewayDeployRequest::new(1).dedicated())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_cleanup_unlabels_every_gateway() {
        let mut nodes = MockNodeClient::new();
        nodes
            .expect_list_gateway_nodes()
            .returning(|| Ok(vec![node("worker-0", false, true)]));
        nodes
            .expect_remove_gateway_label()
            .with(eq("worker-0"))
            .times(1)
            .returning(|_| Ok(()));
        nodes
            .expect_remove_gateway_label_from_all()
            .times(1)
            .returning(|| Ok(0));

        manager(nodes).cleanup().await.unwrap();
    }
}
