//! Common types for cloud-prepare: errors, retry, reporting and configuration

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod naming;
pub mod reporter;
pub mod retry;
pub mod telemetry;
pub mod types;

pub use config::{CloudConfig, ProviderConfig};
pub use error::{ApiError, Error};
pub use naming::Naming;
pub use reporter::{NoopReporter, RecordingReporter, ReportEvent, Reporter, TracingReporter};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use types::{
    Direction, GatewayDeployRequest, GatewayKind, GatewayMode, GatewayResource, PortSpec,
    Protocol, RuleGroup, RuleSetKind, SecurityRule,
};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Node label marking a gateway node
pub const GATEWAY_LABEL: &str = "submariner.io/gateway";

/// Value of [`GATEWAY_LABEL`] on gateway nodes
pub const GATEWAY_LABEL_VALUE: &str = "true";

/// Label selector for gateway nodes
pub const GATEWAY_LABEL_SELECTOR: &str = "submariner.io/gateway=true";

/// Name prefix of managed intra-cluster rules
pub const INTERNAL_RULE_PREFIX: &str = "Submariner-Internal-";

/// Name prefix of managed public gateway rules
pub const EXTERNAL_RULE_PREFIX: &str = "Submariner-External-";

/// Description prefix of managed intra-cluster AWS rules
pub const INTERNAL_TRAFFIC_DESCRIPTION: &str = "Internal Submariner traffic";

/// Network tag put on dedicated gateway instances
pub const GATEWAY_NODE_TAG: &str = "submariner-io-gateway-node";

/// Well-known node label carrying the zone
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Port used for intra-cluster VXLAN traffic
pub const DEFAULT_VXLAN_PORT: u16 = 4800;

/// Default IPsec NAT-T port
pub const DEFAULT_NATT_PORT: u16 = 4500;
