//! Firewall rule builders and per-name reconciliation.

use tracing::debug;

use cloud_prepare_common::{Naming, PortSpec, Result};
use cloud_prepare_gateway::Reconciled;

use super::client::{ComputeApi, Firewall, FirewallAllowed, EGRESS, INGRESS};
use super::{GcpCloud, PROVIDER};
use crate::wrap;

const PUBLIC_PORTS_RULE: &str = "submariner-public-ports";
const INTERNAL_PORTS_RULE: &str = "submariner-internal-ports";

pub(crate) fn internal_rule_name(naming: &Naming) -> String {
    naming.with_suffix(&format!("{INTERNAL_PORTS_RULE}-ingress"))
}

/// Ingress and egress names of the public rules
pub(crate) fn external_rule_names(naming: &Naming) -> [String; 2] {
    [
        naming.with_suffix(&format!("{PUBLIC_PORTS_RULE}-ingress")),
        naming.with_suffix(&format!("{PUBLIC_PORTS_RULE}-egress")),
    ]
}

fn rule(project_id: &str, naming: &Naming, name: String, direction: &str, ports: &[PortSpec]) -> Firewall {
    Firewall {
        name,
        network: format!(
            "projects/{project_id}/global/networks/{}",
            naming.with_suffix("network")
        ),
        direction: direction.to_string(),
        allowed: ports
            .iter()
            .map(|p| FirewallAllowed {
                ip_protocol: p.protocol.as_str().to_string(),
                ports: vec![p.port.to_string()],
            })
            .collect(),
        ..Default::default()
    }
}

/// Ingress between every worker and master
pub(crate) fn internal_rule(project_id: &str, naming: &Naming, ports: &[PortSpec]) -> Firewall {
    let tags = vec![naming.with_suffix("worker"), naming.with_suffix("master")];
    Firewall {
        source_tags: tags.clone(),
        target_tags: tags,
        ..rule(project_id, naming, internal_rule_name(naming), INGRESS, ports)
    }
}

/// Public ingress and egress rules for gateways
pub(crate) fn external_rules(project_id: &str, naming: &Naming, ports: &[PortSpec]) -> [Firewall; 2] {
    let [ingress, egress] = external_rule_names(naming);
    [
        rule(project_id, naming, ingress, INGRESS, ports),
        rule(project_id, naming, egress, EGRESS, ports),
    ]
}

impl<C: ComputeApi> GcpCloud<C> {
    /// Insert the rule when absent, update it when it differs
    pub(crate) async fn reconcile_rule(&self, desired: Firewall) -> Result<Reconciled> {
        let name = desired.name.clone();
        match self.compute.get_firewall_rule(&name).await {
            Ok(current) if current.same_rules(&desired) => {
                debug!(rule = %name, "Firewall rule up to date");
                Ok(Reconciled::Noop)
            }
            Ok(_) => {
                self.compute
                    .update_firewall_rule(&name, desired)
                    .await
                    .map_err(wrap(PROVIDER, "update firewall rule", &name))?;
                Ok(Reconciled::Applied)
            }
            Err(e) if e.is_not_found() => {
                self.compute
                    .insert_firewall_rule(desired)
                    .await
                    .map_err(wrap(PROVIDER, "insert firewall rule", &name))?;
                Ok(Reconciled::Applied)
            }
            Err(e) => Err(wrap(PROVIDER, "get firewall rule", &name)(e)),
        }
    }

    /// Delete a rule; an absent rule is a no-op
    pub(crate) async fn delete_rule(&self, name: &str) -> Result<Reconciled> {
        match self.compute.delete_firewall_rule(name).await {
            Ok(()) => Ok(Reconciled::Applied),
            Err(e) if e.is_not_found() => Ok(Reconciled::Noop),
            Err(e) => Err(wrap(PROVIDER, "delete firewall rule", name)(e)),
        }
    }
}
