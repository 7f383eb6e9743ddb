//! GCP adapter.
//!
//! Ports are opened with per-name firewall rules on the cluster network
//! `{infraID}-network`; dedicated gateways are machine sets spread over the
//! zones of the region.

pub mod client;
mod firewall;
mod gateway;

use async_trait::async_trait;
use tracing::info;

use cloud_prepare_common::config::GatewayConfig;
use cloud_prepare_common::{CloudConfig, Error, Naming, PortSpec, ProviderConfig, Result};
use cloud_prepare_gateway::{
    require, CloudPorts, CloudResource, Reconciled, ResourceKind, ResourceLocator,
};

pub use client::{ComputeApi, Firewall, FirewallAllowed, Instance, Zone};
pub use gateway::{GcpGatewayProvider, DEFAULT_INSTANCE_TYPE};

use crate::wrap;

pub(crate) const PROVIDER: &str = "gcp";

/// One GCP cluster: its Compute client, project and naming
pub struct GcpCloud<C> {
    compute: C,
    naming: Naming,
    project_id: String,
    gateway: GatewayConfig,
}

impl<C: ComputeApi> GcpCloud<C> {
    /// Create the adapter for a cluster configured with the `gcp` provider
    pub fn new(compute: C, config: &CloudConfig) -> Result<Self> {
        let ProviderConfig::Gcp(gcp) = &config.provider else {
            return Err(Error::config(format!(
                "expected gcp provider configuration, got {}",
                config.provider.name()
            )));
        };
        config.validate()?;
        Ok(Self {
            compute,
            naming: config.naming(),
            project_id: gcp.project_id.clone(),
            gateway: config.gateway.clone(),
        })
    }

    /// Cluster naming
    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    fn network_name(&self) -> String {
        self.naming.with_suffix("network")
    }

    /// Fails with `NotFound` when the cluster network is missing
    async fn require_network(&self) -> Result<CloudResource> {
        require(self, ResourceKind::Network, &self.network_name()).await
    }

    /// Zones of the cluster region, in listing order
    pub(crate) async fn region_zones(&self) -> Result<Vec<Zone>> {
        let zones = self
            .compute
            .list_zones()
            .await
            .map_err(wrap(PROVIDER, "list zones", &self.project_id))?;
        Ok(zones
            .into_iter()
            .filter(|z| z.region_name() == self.naming.region())
            .collect())
    }

    /// Instances across the region carrying network tag `tag`
    pub(crate) async fn tagged_instances(&self, tag: &str) -> Result<Vec<Instance>> {
        let mut tagged = Vec::new();
        for zone in self.region_zones().await? {
            let instances = self
                .compute
                .list_instances(&zone.name)
                .await
                .map_err(wrap(PROVIDER, "list instances", &zone.name))?;
            tagged.extend(instances.into_iter().filter(|i| i.has_tag(tag)));
        }
        Ok(tagged)
    }
}

fn instance_resource(instance: Instance) -> CloudResource {
    let resource = CloudResource::new(&instance.name, &instance.name).in_zone(&instance.zone);
    instance
        .tags
        .iter()
        .fold(resource, |r, tag| r.with_tag(tag.as_str(), ""))
}

#[async_trait]
impl<C: ComputeApi> ResourceLocator for GcpCloud<C> {
    async fn find_by_name(&self, kind: ResourceKind, name: &str) -> Result<Option<CloudResource>> {
        let found = match kind {
            ResourceKind::Network => self
                .compute
                .get_network(name)
                .await
                .map(|n| CloudResource::new(n.self_link, n.name)),
            ResourceKind::FirewallRule => self
                .compute
                .get_firewall_rule(name)
                .await
                .map(|f| CloudResource::new(&f.name, f.name.clone())),
            other => {
                return Err(Error::unsupported(format!("gcp cannot look up {other} by name")));
            }
        };
        match found {
            Ok(resource) => Ok(Some(resource)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(wrap(PROVIDER, "get", name)(e)),
        }
    }

    async fn find_by_tag(&self, kind: ResourceKind, tag_prefix: &str) -> Result<Vec<CloudResource>> {
        if kind != ResourceKind::Instance {
            return Err(Error::unsupported(format!("gcp cannot look up {kind} by tag")));
        }
        let mut found = Vec::new();
        for zone in self.region_zones().await? {
            let instances = self
                .compute
                .list_instances(&zone.name)
                .await
                .map_err(wrap(PROVIDER, "list instances", &zone.name))?;
            found.extend(
                instances
                    .into_iter()
                    .filter(|i| i.tags.iter().any(|t| t.starts_with(tag_prefix)))
                    .map(instance_resource),
            );
        }
        Ok(found)
    }
}

impl<C: ComputeApi> GcpCloud<C> {
    /// Open `ports` between workers and masters
    pub async fn ensure_internal_rule(&self, ports: &[PortSpec]) -> Result<Reconciled> {
        self.require_network().await?;
        let rule = firewall::internal_rule(&self.project_id, &self.naming, ports);
        let name = rule.name.clone();
        let outcome = self.reconcile_rule(rule).await?;
        info!(rule = %name, outcome = ?outcome, "Reconciled internal firewall rule");
        Ok(outcome)
    }

    /// Delete the internal firewall rule
    pub async fn remove_internal_rule(&self) -> Result<Reconciled> {
        self.delete_rule(&firewall::internal_rule_name(&self.naming))
            .await
    }
}

#[async_trait]
impl<C: ComputeApi> CloudPorts for GcpCloud<C> {
    async fn open_ports(&self, ports: &[PortSpec]) -> Result<()> {
        self.ensure_internal_rule(ports).await.map(|_| ())
    }

    async fn close_ports(&self) -> Result<()> {
        self.remove_internal_rule().await.map(|_| ())
    }
}
