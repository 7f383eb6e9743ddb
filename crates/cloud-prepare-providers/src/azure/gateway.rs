//! Azure gateways: dedicated machine sets per availability zone, or worker
//! nodes labeled as gateways with the gateway NSG on their NIC.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::info;

use cloud_prepare_common::{
    GatewayDeployRequest, GatewayKind, GatewayMode, GatewayResource, PortSpec, Result, RuleSetKind,
};
use cloud_prepare_gateway::{
    eligible_placements, GatewayProvider, Placement, Reconciled, ZoneCandidate,
};
use cloud_prepare_k8s::nodes::NON_GATEWAY_SELECTOR;
use cloud_prepare_k8s::{
    gateway_candidates, MachineSetDeployer, MachineSetTemplate, MachineSetVars, NodeClient,
    NodeInfo, MACHINE_API_NAMESPACE,
};

use super::client::AzureNetworkApi;
use super::{AzureCloud, PROVIDER};

/// VM size used when none is configured
pub const DEFAULT_INSTANCE_TYPE: &str = "Standard_D4s_v3";

/// Gateways on Azure, in either mode
pub struct AzureGatewayProvider<C, N, M> {
    cloud: AzureCloud<C>,
    nodes: N,
    machine_sets: M,
}

impl<C, N, M> AzureGatewayProvider<C, N, M>
where
    C: AzureNetworkApi,
    N: NodeClient,
    M: MachineSetDeployer,
{
    /// Create a provider labeling nodes through `nodes` and deploying machine sets through `machine_sets`
    pub fn new(cloud: AzureCloud<C>, nodes: N, machine_sets: M) -> Self {
        Self {
            cloud,
            nodes,
            machine_sets,
        }
    }

    /// The underlying cluster adapter
    pub fn cloud(&self) -> &AzureCloud<C> {
        &self.cloud
    }

    fn instance_type(&self) -> String {
        self.cloud
            .gateway
            .instance_type
            .clone()
            .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string())
    }

    /// Availability zone number from a `topology.kubernetes.io/zone` value
    /// like `eastus-1`
    fn zone_number<'a>(&self, zone: &'a str) -> &'a str {
        zone.strip_prefix(self.cloud.naming.region())
            .and_then(|z| z.strip_prefix('-'))
            .unwrap_or(zone)
    }

    /// Machine set nodes are named `{machineSet}-{suffix}`
    fn as_gateway(&self, node: NodeInfo) -> GatewayResource {
        let prefix = self.cloud.naming.gateway_prefix();
        let zone_and_suffix = node.name.strip_prefix(&prefix);
        match zone_and_suffix.and_then(|rest| rest.split_once('-')) {
            Some((zone, _)) => {
                GatewayResource::dedicated(self.cloud.naming.gateway_name(zone), zone)
            }
            None => GatewayResource::labeled(node.name, node.zone),
        }
    }

    async fn zone_placements(&self, occupied: &HashSet<&str>) -> Result<Vec<Placement>> {
        let instance_type = self.instance_type();
        let zones = self.cloud.offered_zones(&instance_type).await?;
        Ok(eligible_placements(zones.into_iter().map(|zone| ZoneCandidate {
            has_capacity: true,
            hosts_gateway: occupied.contains(zone.as_str()),
            id: Placement::Zone {
                zone,
                subnet: None,
                instance_type: Some(instance_type.clone()),
            },
        })))
    }

    async fn deploy_machine_set(
        &self,
        zone: &str,
        instance_type: Option<&str>,
        request: &GatewayDeployRequest,
    ) -> Result<GatewayResource> {
        let naming = &self.cloud.naming;
        let name = naming.gateway_name(zone);
        let mut vars = MachineSetVars::new(&name, naming.infra_id(), naming.region());
        vars.zone = zone.to_string();
        vars.instance_type = instance_type
            .map(str::to_string)
            .unwrap_or_else(|| self.instance_type());
        vars.public_ip = !request.air_gapped;

        let machine_set = MachineSetTemplate::Azure.render(&vars)?;
        self.machine_sets.deploy(&machine_set).await?;
        info!(gateway = %name, zone = %zone, "Deployed gateway machine set");
        Ok(GatewayResource::dedicated(name, zone))
    }

    async fn label_node(&self, name: &str, zone: Option<String>) -> Result<GatewayResource> {
        let group_id = self.cloud.external_group_id().await?;
        self.cloud.attach_node_interface(name, &group_id).await?;
        self.nodes.add_gateway_label(name).await?;
        Ok(GatewayResource::labeled(name, zone))
    }
}

#[async_trait]
impl<C, N, M> GatewayProvider for AzureGatewayProvider<C, N, M>
where
    C: AzureNetworkApi,
    N: NodeClient,
    M: MachineSetDeployer,
{
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn supports(&self, _mode: GatewayMode) -> bool {
        true
    }

    async fn locate_existing(&self) -> Result<Vec<GatewayResource>> {
        let nodes = self.nodes.list_gateway_nodes().await?;
        Ok(nodes.into_iter().map(|n| self.as_gateway(n)).collect())
    }

    async fn ensure_rule_set(&self, kind: RuleSetKind, ports: &[PortSpec]) -> Result<Reconciled> {
        match kind {
            RuleSetKind::Internal => self.cloud.ensure_internal_rules(ports).await,
            RuleSetKind::External => self.cloud.ensure_external_group(ports).await,
        }
    }

    async fn remove_rule_set(&self, kind: RuleSetKind) -> Result<Reconciled> {
        match kind {
            RuleSetKind::Internal => self.cloud.remove_internal_rules().await,
            RuleSetKind::External => self.cloud.delete_external_group().await,
        }
    }

    async fn resolve_placement(
        &self,
        mode: GatewayMode,
        existing: &[GatewayResource],
    ) -> Result<Vec<Placement>> {
        match mode {
            GatewayMode::Dedicated => {
                let occupied: HashSet<&str> = existing
                    .iter()
                    .filter_map(|g| g.zone.as_deref())
                    .map(|z| self.zone_number(z))
                    .collect();
                self.zone_placements(&occupied).await
            }
            GatewayMode::Labeled => {
                let nodes = self.nodes.list_nodes(NON_GATEWAY_SELECTOR).await?;
                Ok(gateway_candidates(nodes)
                    .into_iter()
                    .map(|n| Placement::node(n.name, n.zone))
                    .collect())
            }
        }
    }

    async fn create_gateway(
        &self,
        placement: &Placement,
        request: &GatewayDeployRequest,
    ) -> Result<GatewayResource> {
        match placement {
            Placement::Zone {
                zone,
                instance_type,
                ..
            } => {
                self.deploy_machine_set(zone, instance_type.as_deref(), request)
                    .await
            }
            Placement::Node { name, zone } => self.label_node(name, zone.clone()).await,
        }
    }

    async fn delete_gateway(&self, gateway: &GatewayResource) -> Result<()> {
        match gateway.kind {
            GatewayKind::Dedicated => {
                self.machine_sets
                    .delete(MACHINE_API_NAMESPACE, &gateway.name)
                    .await
            }
            GatewayKind::LabeledNode => {
                // the NSG may already be gone along with its attachments
                match self.cloud.external_group_id().await {
                    Ok(group_id) => {
                        self.cloud
                            .detach_interface(&format!("{}-nic", gateway.name), &group_id)
                            .await?
                    }
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                self.nodes.remove_gateway_label(&gateway.name).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::client::MockAzureNetworkApi;
    use super::super::testing::*;
    use super::*;
    use cloud_prepare_common::{
        ApiError, NoopReporter, GATEWAY_LABEL, GATEWAY_LABEL_VALUE,
    };
    use cloud_prepare_gateway::{DeployOutcome, GatewayLifecycleManager};
    use cloud_prepare_k8s::{MockMachineSetDeployer, MockNodeClient};
    use mockall::predicate::eq;

    type Provider = AzureGatewayProvider<MockAzureNetworkApi, MockNodeClient, MockMachineSetDeployer>;

    fn manager(
        network: MockAzureNetworkApi,
        nodes: MockNodeClient,
        machine_sets: MockMachineSetDeployer,
    ) -> GatewayLifecycleManager<Provider> {
        GatewayLifecycleManager::new(
            AzureGatewayProvider::new(cloud(network), nodes, machine_sets),
            Arc::new(NoopReporter),
        )
    }

    fn node(name: &str, zone: &str, gateway: bool) -> NodeInfo {
        let mut info = NodeInfo {
            name: name.to_string(),
            zone: Some(zone.to_string()),
            ..Default::default()
        };
        if gateway {
            info.labels
                .insert(GATEWAY_LABEL.to_string(), GATEWAY_LABEL_VALUE.to_string());
        }
        info
    }

    fn external_nsg_exists(network: &mut MockAzureNetworkApi) {
        network
            .expect_get_security_group()
            .with(eq(RG), eq(EXTERNAL_NSG))
            .returning(|_, name| {
                let rules = super::super::nsg::managed_rules(
                    RuleSetKind::External,
                    &[PortSpec::udp(4500)],
                    3500,
                );
                Ok(security_group(name, rules))
            });
    }

    #[test]
    fn test_gateway_nodes_split_by_machine_set_prefix() {
        let provider: Provider = AzureGatewayProvider::new(
            cloud(MockAzureNetworkApi::new()),
            MockNodeClient::new(),
            MockMachineSetDeployer::new(),
        );

        let dedicated = provider.as_gateway(node("abc-submariner-gw-2-x7k2p", "eastus-2", true));
        assert_eq!(dedicated, GatewayResource::dedicated("abc-submariner-gw-2", "2"));

        let labeled = provider.as_gateway(node("abc-worker-eastus1-q9", "eastus-1", true));
        assert_eq!(labeled.kind, GatewayKind::LabeledNode);
        assert_eq!(labeled.zone.as_deref(), Some("eastus-1"));
        assert_eq!(provider.zone_number("eastus-3"), "3");
    }

    /// Story: a labeled gateway already sits in zone 1; two dedicated
    /// gateways are requested and the new machine set goes to the first
    /// offered zone without one
    #[tokio::test]
    async fn story_dedicated_skips_zone_with_gateway() {
        let mut network = MockAzureNetworkApi::new();
        external_nsg_exists(&mut network);
        network.expect_create_or_update_security_group().never();
        network
            .expect_list_resource_skus()
            .returning(|_| Ok(vec![sku(DEFAULT_INSTANCE_TYPE, &["1", "2", "3"])]));

        let mut nodes = MockNodeClient::new();
        nodes
            .expect_list_gateway_nodes()
            .returning(|| Ok(vec![node("abc-worker-eastus1-q9", "eastus-1", true)]));

        let mut machine_sets = MockMachineSetDeployer::new();
        machine_sets
            .expect_deploy()
            .withf(|ms| ms.name == "abc-submariner-gw-2")
            .times(1)
            .returning(|ms| {
                let spec = &ms.manifest["spec"]["template"]["spec"]["providerSpec"]["value"];
                assert_eq!(spec["vmSize"], DEFAULT_INSTANCE_TYPE);
                assert_eq!(spec["zone"], "2");
                assert_eq!(spec["publicIP"], true);
                Ok(())
            });

        let request = GatewayDeployRequest::new(2)
            .dedicated()
            .with_public_ports([PortSpec::udp(4500)]);
        let outcome = manager(network, nodes, machine_sets)
            .deploy(&request)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DeployOutcome::ScaledUp {
                created: vec![GatewayResource::dedicated("abc-submariner-gw-2", "2")]
            }
        );
    }

    /// Story: labeled mode creates the gateway NSG, attaches it to the
    /// chosen worker's NIC and labels the worker; masters are never chosen
    #[tokio::test]
    async fn story_labeled_gateway_gets_nsg_on_nic() {
        let mut network = MockAzureNetworkApi::new();
        let mut created = false;
        network
            .expect_get_security_group()
            .with(eq(RG), eq(EXTERNAL_NSG))
            .returning(move |_, name| {
                if created {
                    Ok(security_group(name, vec![]))
                } else {
                    created = true;
                    Err(ApiError::not_found(name))
                }
            });
        network
            .expect_create_or_update_security_group()
            .withf(|_, nsg| nsg.name == EXTERNAL_NSG && nsg.rules.len() == 2)
            .times(1)
            .returning(|_, nsg| Ok(nsg));
        network
            .expect_get_network_interface()
            .with(eq(RG), eq("worker-a-nic"))
            .returning(|_, _| Ok(nic("worker-a", None)));
        network
            .expect_update_network_interface()
            .withf(|_, nic| nic.security_group.as_deref() == Some(EXTERNAL_NSG_ID))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut nodes = MockNodeClient::new();
        nodes.expect_list_gateway_nodes().returning(|| Ok(vec![]));
        nodes.expect_list_nodes().returning(|_| {
            let mut master = node("master-0", "eastus-1", false);
            master.control_plane = true;
            Ok(vec![master, node("worker-a", "eastus-2", false)])
        });
        nodes
            .expect_add_gateway_label()
            .with(eq("worker-a"))
            .times(1)
            .returning(|_| Ok(()));

        let request = GatewayDeployRequest::new(1).with_public_ports([PortSpec::udp(4500)]);
        let outcome = manager(network, nodes, MockMachineSetDeployer::new())
            .deploy(&request)
            .await
            .unwrap();
        assert!(matches!(outcome, DeployOutcome::ScaledUp { ref created } if created[0].name == "worker-a"));
    }

    #[tokio::test]
    async fn test_instance_type_not_offered_is_capacity_error() {
        let mut network = MockAzureNetworkApi::new();
        external_nsg_exists(&mut network);
        network
            .expect_list_resource_skus()
            .returning(|_| Ok(vec![sku("Standard_D8s_v3", &["1", "2"])]));
        let mut nodes = MockNodeClient::new();
        nodes.expect_list_gateway_nodes().returning(|| Ok(vec![]));
        let mut machine_sets = MockMachineSetDeployer::new();
        machine_sets.expect_deploy().never();

        let err = manager(network, nodes, machine_sets)
            .deploy(&GatewayDeployRequest::new(1).dedicated())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            cloud_prepare_common::Error::CapacityInsufficient { requested: 1, placed: 0, .. }
        ));
    }

    /// Story: cleanup deletes the NSG after detaching it, removes the
    /// dedicated machine set, unlabels the labeled node and drops the
    /// internal rules
    #[tokio::test]
    async fn story_cleanup_handles_both_kinds() {
        let mut network = MockAzureNetworkApi::new();
        // gone once the delete went through
        let mut lookups = 0;
        network
            .expect_get_security_group()
            .with(eq(RG), eq(EXTERNAL_NSG))
            .returning(move |_, name| {
                lookups += 1;
                if lookups > 2 {
                    return Err(ApiError::not_found(name));
                }
                let mut group = security_group(name, vec![]);
                group.network_interfaces = vec![nic("worker-a", None).id];
                Ok(group)
            });
        network
            .expect_get_network_interface()
            .with(eq(RG), eq("worker-a-nic"))
            .times(1)
            .returning(|_, _| Ok(nic("worker-a", Some(EXTERNAL_NSG_ID))));
        network
            .expect_update_network_interface()
            .times(1)
            .returning(|_, _| Ok(()));
        network
            .expect_delete_security_group()
            .with(eq(RG), eq(EXTERNAL_NSG))
            .times(1)
            .returning(|_, _| Ok(()));
        network
            .expect_get_security_group()
            .with(eq(RG), eq("abc-nsg"))
            .returning(|_, name| Ok(security_group(name, vec![])));

        let mut nodes = MockNodeClient::new();
        nodes.expect_list_gateway_nodes().returning(|| {
            Ok(vec![
                node("abc-submariner-gw-1-x7k2p", "eastus-1", true),
                node("worker-a", "eastus-2", true),
            ])
        });
        nodes
            .expect_remove_gateway_label()
            .with(eq("worker-a"))
            .times(1)
            .returning(|_| Ok(()));

        let mut machine_sets = MockMachineSetDeployer::new();
        machine_sets
            .expect_delete()
            .with(eq(MACHINE_API_NAMESPACE), eq("abc-submariner-gw-1"))
            .times(1)
            .returning(|_, _| Ok(()));

        manager(network, nodes, machine_sets).cleanup().await.unwrap();
    }
}
