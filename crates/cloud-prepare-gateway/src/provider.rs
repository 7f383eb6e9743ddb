//! The capability set a cloud adapter implements for the lifecycle manager.

use std::fmt;

use async_trait::async_trait;

use cloud_prepare_common::{
    GatewayDeployRequest, GatewayMode, GatewayResource, PortSpec, Result, RuleSetKind,
};

use crate::reconciler::Reconciled;

/// Where a new gateway goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// A dedicated instance in a zone
    Zone {
        /// Availability zone
        zone: String,
        /// Subnet the instance lands in, for providers that need one
        subnet: Option<String>,
        /// Instance type offered in this zone, when chosen per zone
        instance_type: Option<String>,
    },
    /// An existing worker node to label
    Node {
        /// Node name
        name: String,
        /// Zone of the node, when known
        zone: Option<String>,
    },
}

impl Placement {
    /// A zone placement without subnet or instance type
    pub fn zone(zone: impl Into<String>) -> Self {
        Placement::Zone {
            zone: zone.into(),
            subnet: None,
            instance_type: None,
        }
    }

    /// A node placement
    pub fn node(name: impl Into<String>, zone: Option<String>) -> Self {
        Placement::Node {
            name: name.into(),
            zone,
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Zone { zone, .. } => write!(f, "in zone {zone}"),
            Placement::Node { name, .. } => write!(f, "on node {name}"),
        }
    }
}

/// Per-provider adapter driven by
/// [`GatewayLifecycleManager`](crate::lifecycle::GatewayLifecycleManager).
///
/// Every method is idempotent. Deletes treat an absent resource as success.
#[async_trait]
pub trait GatewayProvider: Send + Sync {
    /// Short provider name used in messages
    fn name(&self) -> &'static str;

    /// Whether this provider can create gateways in `mode`
    fn supports(&self, mode: GatewayMode) -> bool;

    /// Permission probes run before any deploy mutation
    async fn prepare_deploy(&self) -> Result<()> {
        Ok(())
    }

    /// Permission probes run before cleanup
    async fn prepare_cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// Gateways that exist right now
    async fn locate_existing(&self) -> Result<Vec<GatewayResource>>;

    /// Make sure the rule set of `kind` allows `ports`
    async fn ensure_rule_set(&self, kind: RuleSetKind, ports: &[PortSpec]) -> Result<Reconciled>;

    /// Remove the rule set of `kind`
    async fn remove_rule_set(&self, kind: RuleSetKind) -> Result<Reconciled>;

    /// Eligible placements for new gateways in provider listing order
    async fn resolve_placement(
        &self,
        mode: GatewayMode,
        existing: &[GatewayResource],
    ) -> Result<Vec<Placement>>;

    /// Create (or label) one gateway
    async fn create_gateway(
        &self,
        placement: &Placement,
        request: &GatewayDeployRequest,
    ) -> Result<GatewayResource>;

    /// Delete (or unlabel) one gateway
    async fn delete_gateway(&self, gateway: &GatewayResource) -> Result<()>;

    /// Tear down shared resources that can only go once every gateway is gone
    async fn finish_cleanup(&self) -> Result<()> {
        Ok(())
    }

    /// What runs out when placement falls short, for capacity errors
    fn capacity_resource(&self, mode: GatewayMode) -> &'static str {
        match mode {
            GatewayMode::Dedicated => "eligible zones",
            GatewayMode::Labeled => "worker nodes",
        }
    }
}

/// Opening and closing the intra-cluster ports of a cluster
#[async_trait]
pub trait CloudPorts: Send + Sync {
    /// Allow `ports` between cluster nodes
    async fn open_ports(&self, ports: &[PortSpec]) -> Result<()>;

    /// Remove the rules added by [`CloudPorts::open_ports`]
    async fn close_ports(&self) -> Result<()>;
}
