//! Provider-agnostic gateway lifecycle.
//!
//! `deploy` computes `desired - current` and only ever scales up:
//!
//! ```text
//! Idle -> ComputingDelta -> NoOp
//!                        -> ScaleDownRejected   (desired < current, nothing deleted)
//!                        -> ScalingUp -> ScaledUp | Error
//! ```
//!
//! Deploy and port operations stop at the first failing step. Cleanup runs
//! every step and aggregates failures into [`Error::Cleanup`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use cloud_prepare_common::{
    Error, GatewayDeployRequest, GatewayResource, PortSpec, Reporter, Result, RuleSetKind,
};

use crate::placement::PlacementPlan;
use crate::provider::{CloudPorts, GatewayProvider};

/// Result of a successful deploy call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    /// Desired count already met
    NoOp,
    /// New gateways were created
    ScaledUp {
        /// Gateways created by this call
        created: Vec<GatewayResource>,
    },
    /// Desired count was lower than current; nothing was removed
    ScaleDownRejected {
        /// Gateways that exist
        current: usize,
        /// Gateways that were asked for
        desired: usize,
    },
}

/// Drives one [`GatewayProvider`] through deploy, cleanup and port operations
pub struct GatewayLifecycleManager<P> {
    provider: P,
    reporter: Arc<dyn Reporter>,
}

impl<P: GatewayProvider> GatewayLifecycleManager<P> {
    /// Create a manager reporting progress to `reporter`
    pub fn new(provider: P, reporter: Arc<dyn Reporter>) -> Self {
        Self { provider, reporter }
    }

    /// The wrapped provider
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Bring the number of gateways up to `request.desired_gateway_count`
    pub async fn deploy(&self, request: &GatewayDeployRequest) -> Result<DeployOutcome> {
        let mode = request.mode();
        if !self.provider.supports(mode) {
            return Err(self.reporter.error(Error::unsupported(format!(
                "{} does not support {mode} gateways",
                self.provider.name()
            ))));
        }

        self.provider
            .prepare_deploy()
            .await
            .map_err(|e| self.reporter.error(e))?;

        self.reporter.started("Retrieving the current gateways");
        let existing = self
            .provider
            .locate_existing()
            .await
            .map_err(|e| self.reporter.error(e))?;

        let current = existing.len();
        let desired = request.desired_gateway_count;
        if desired == current {
            self.reporter
                .succeeded(&format!("Current gateways match the required number of gateways ({current})"));
            return Ok(DeployOutcome::NoOp);
        }
        if desired < current {
            warn!(current, desired, provider = self.provider.name(), "Rejecting gateway scale down");
            self.reporter.failed(&Error::unsupported(
                "decreasing the number of gateway nodes is not supported",
            ));
            self.reporter.warning(&format!(
                "Leaving the {current} existing gateways in place"
            ));
            return Ok(DeployOutcome::ScaleDownRejected { current, desired });
        }

        let needed = desired - current;
        self.reporter.succeeded(&format!(
            "Found {current} gateways, {needed} more needed"
        ));

        self.reporter
            .started("Ensuring the public ports are open on gateways");
        self.provider
            .ensure_rule_set(RuleSetKind::External, &request.public_ports)
            .await
            .map_err(|e| self.reporter.error(e))?;
        self.reporter.succeeded("Public ports are open on gateways");

        self.reporter.started("Resolving gateway placement");
        let eligible = self
            .provider
            .resolve_placement(mode, &existing)
            .await
            .map_err(|e| self.reporter.error(e))?;
        let plan = PlacementPlan::new(eligible, needed);
        self.reporter.succeeded(&format!(
            "Found {} eligible placements for {needed} gateways",
            plan.selected.len()
        ));

        let mut created = Vec::with_capacity(plan.selected.len());
        for placement in &plan.selected {
            self.reporter
                .started(&format!("Deploying gateway {placement}"));
            let gateway = self
                .provider
                .create_gateway(placement, request)
                .await
                .map_err(|e| self.reporter.error(e))?;
            self.reporter
                .succeeded(&format!("Deployed gateway {}", gateway.name));
            created.push(gateway);
        }

        if !plan.is_sufficient() {
            return Err(self.reporter.error(Error::capacity(
                self.provider.capacity_resource(mode),
                needed,
                created.len(),
            )));
        }

        info!(
            provider = self.provider.name(),
            created = created.len(),
            "Gateways deployed"
        );
        Ok(DeployOutcome::ScaledUp { created })
    }

    /// Remove every gateway and both managed rule sets
    pub async fn cleanup(&self) -> Result<()> {
        self.provider
            .prepare_cleanup()
            .await
            .map_err(|e| self.reporter.error(e))?;

        let mut failures = Vec::new();

        self.reporter.started("Removing the public gateway rules");
        match self.provider.remove_rule_set(RuleSetKind::External).await {
            Ok(_) => self.reporter.succeeded("Removed the public gateway rules"),
            Err(e) => failures.push(self.reporter.error(e)),
        }

        self.reporter.started("Retrieving the current gateways");
        match self.provider.locate_existing().await {
            Ok(gateways) => {
                for gateway in &gateways {
                    self.reporter
                        .started(&format!("Removing gateway {}", gateway.name));
                    match self.provider.delete_gateway(gateway).await {
                        Ok(()) => self
                            .reporter
                            .succeeded(&format!("Removed gateway {}", gateway.name)),
                        Err(e) if e.is_not_found() => self
                            .reporter
                            .succeeded(&format!("Gateway {} was already removed", gateway.name)),
                        Err(e) => failures.push(self.reporter.error(e)),
                    }
                }
            }
            Err(e) => failures.push(self.reporter.error(e)),
        }

        self.reporter.started("Removing the internal cluster rules");
        match self.provider.remove_rule_set(RuleSetKind::Internal).await {
            Ok(_) => self.reporter.succeeded("Removed the internal cluster rules"),
            Err(e) => failures.push(self.reporter.error(e)),
        }

        if let Err(e) = self.provider.finish_cleanup().await {
            failures.push(self.reporter.error(e));
        }

        if !failures.is_empty() {
            warn!(
                provider = self.provider.name(),
                failures = failures.len(),
                "Cleanup finished with failures"
            );
        }
        Error::from_cleanup_failures(failures)
    }
}

#[async_trait]
impl<P: GatewayProvider> CloudPorts for GatewayLifecycleManager<P> {
    async fn open_ports(&self, ports: &[PortSpec]) -> Result<()> {
        self.reporter
            .started("Opening the internal ports between cluster nodes");
        self.provider
            .ensure_rule_set(RuleSetKind::Internal, ports)
            .await
            .map_err(|e| self.reporter.error(e))?;
        self.reporter.succeeded("Opened the internal ports");
        Ok(())
    }

    async fn close_ports(&self) -> Result<()> {
        self.reporter
            .started("Closing the internal ports between cluster nodes");
        self.provider
            .remove_rule_set(RuleSetKind::Internal)
            .await
            .map_err(|e| self.reporter.error(e))?;
        self.reporter.succeeded("Closed the internal ports");
        Ok(())
    }
}
