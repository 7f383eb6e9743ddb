//! Dedicated GCP gateways: one machine set per zone of the region.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::info;

use cloud_prepare_common::{
    Error, GatewayDeployRequest, GatewayMode, GatewayResource, PortSpec, Result, RuleSetKind,
    GATEWAY_NODE_TAG,
};
use cloud_prepare_gateway::{
    eligible_placements, GatewayProvider, Placement, Reconciled, ZoneCandidate,
};
use cloud_prepare_k8s::{
    MachineSetDeployer, MachineSetTemplate, MachineSetVars, MACHINE_API_NAMESPACE,
};

use super::client::ComputeApi;
use super::firewall::{external_rule_names, external_rules};
use super::{GcpCloud, PROVIDER};

/// Machine type used when none is configured
pub const DEFAULT_INSTANCE_TYPE: &str = "n1-standard-4";

/// Gateways as OpenShift machine sets in the zones of the region
pub struct GcpGatewayProvider<C, M> {
    cloud: GcpCloud<C>,
    machine_sets: M,
}

impl<C: ComputeApi, M: MachineSetDeployer> GcpGatewayProvider<C, M> {
    /// Create a provider deploying machine sets through `machine_sets`
    pub fn new(cloud: GcpCloud<C>, machine_sets: M) -> Self {
        Self {
            cloud,
            machine_sets,
        }
    }

    /// The underlying cluster adapter
    pub fn cloud(&self) -> &GcpCloud<C> {
        &self.cloud
    }

    async fn gateway_image(&self) -> Result<String> {
        match &self.cloud.gateway.image {
            Some(image) => Ok(image.clone()),
            None => {
                self.machine_sets
                    .worker_image(MACHINE_API_NAMESPACE, self.cloud.naming.infra_id())
                    .await
            }
        }
    }
}

#[async_trait]
impl<C: ComputeApi, M: MachineSetDeployer> GatewayProvider for GcpGatewayProvider<C, M> {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn supports(&self, mode: GatewayMode) -> bool {
        mode == GatewayMode::Dedicated
    }

    /// Instances tagged as gateway nodes, with or without a public IP
    async fn locate_existing(&self) -> Result<Vec<GatewayResource>> {
        let instances = self.cloud.tagged_instances(GATEWAY_NODE_TAG).await?;
        let zones: HashSet<String> = instances.into_iter().map(|i| i.zone).collect();
        let mut gateways: Vec<_> = zones
            .into_iter()
            .map(|zone| GatewayResource::dedicated(self.cloud.naming.gateway_name(&zone), zone))
            .collect();
        gateways.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(gateways)
    }

    async fn ensure_rule_set(&self, kind: RuleSetKind, ports: &[PortSpec]) -> Result<Reconciled> {
        match kind {
            RuleSetKind::Internal => self.cloud.ensure_internal_rule(ports).await,
            RuleSetKind::External => {
                self.cloud.require_network().await?;
                let mut outcome = Reconciled::Noop;
                for rule in external_rules(&self.cloud.project_id, &self.cloud.naming, ports) {
                    if self.cloud.reconcile_rule(rule).await?.is_applied() {
                        outcome = Reconciled::Applied;
                    }
                }
                Ok(outcome)
            }
        }
    }

    async fn remove_rule_set(&self, kind: RuleSetKind) -> Result<Reconciled> {
        match kind {
            RuleSetKind::Internal => self.cloud.remove_internal_rule().await,
            RuleSetKind::External => {
                let mut outcome = Reconciled::Noop;
                for name in external_rule_names(&self.cloud.naming) {
                    if self.cloud.delete_rule(&name).await?.is_applied() {
                        outcome = Reconciled::Applied;
                    }
                }
                Ok(outcome)
            }
        }
    }

    async fn resolve_placement(
        &self,
        _mode: GatewayMode,
        existing: &[GatewayResource],
    ) -> Result<Vec<Placement>> {
        let occupied: HashSet<&str> = existing.iter().filter_map(|g| g.zone.as_deref()).collect();
        let zones = self.cloud.region_zones().await?;
        Ok(eligible_placements(zones.into_iter().map(|z| ZoneCandidate {
            has_capacity: z.status == "UP",
            hosts_gateway: occupied.contains(z.name.as_str()),
            id: Placement::zone(z.name),
        })))
    }

    async fn create_gateway(
        &self,
        placement: &Placement,
        request: &GatewayDeployRequest,
    ) -> Result<GatewayResource> {
        let Placement::Zone { zone, .. } = placement else {
            return Err(Error::unsupported(format!(
                "gcp gateways are placed in zones, got placement {placement}"
            )));
        };

        let naming = &self.cloud.naming;
        let name = naming.gateway_name(zone);
        let mut vars = MachineSetVars::new(&name, naming.infra_id(), naming.region());
        vars.zone = zone.clone();
        vars.project_id = Some(self.cloud.project_id.clone());
        vars.instance_type = self
            .cloud
            .gateway
            .instance_type
            .clone()
            .unwrap_or_else(|| DEFAULT_INSTANCE_TYPE.to_string());
        vars.image = self.gateway_image().await?;
        vars.public_ip = !request.air_gapped;

        let machine_set = MachineSetTemplate::Gcp.render(&vars)?;
        self.machine_sets.deploy(&machine_set).await?;
        info!(gateway = %name, zone = %zone, "Deployed gateway machine set");
        Ok(GatewayResource::dedicated(name, zone.clone()))
    }

    async fn delete_gateway(&self, gateway: &GatewayResource) -> Result<()> {
        self.machine_sets
            .delete(MACHINE_API_NAMESPACE, &gateway.name)
            .await
    }
}
