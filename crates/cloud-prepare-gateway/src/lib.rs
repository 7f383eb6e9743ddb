//! Provider-agnostic gateway reconciliation for cloud-prepare.
//!
//! [`GatewayLifecycleManager`] drives any [`GatewayProvider`] through
//! deploy, cleanup and port operations. Providers use [`RuleReconciler`] for
//! managed rule sets and [`placement`] helpers to pick zones.

pub mod lifecycle;
pub mod locator;
pub mod placement;
pub mod provider;
pub mod reconciler;

pub use lifecycle::{DeployOutcome, GatewayLifecycleManager};
pub use locator::{require, CloudResource, ResourceKind, ResourceLocator};
pub use placement::{eligible_placements, PlacementPlan, ZoneCandidate};
pub use provider::{CloudPorts, GatewayProvider, Placement};
pub use reconciler::{Reconciled, RuleReconciler, RuleStore};
