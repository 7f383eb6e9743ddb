//! Value types shared by the gateway engine and provider adapters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, EXTERNAL_RULE_PREFIX, INTERNAL_RULE_PREFIX};

// =============================================================================
// Ports
// =============================================================================

/// Transport protocol of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl Protocol {
    /// Lowercase name as used by most cloud APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(Error::validation(format!("unknown protocol {other:?}"))),
        }
    }
}

/// A port that must be reachable, e.g. `4500/udp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port number
    pub port: u16,
    /// Protocol
    pub protocol: Protocol,
}

impl PortSpec {
    /// Create a port spec
    pub const fn new(port: u16, protocol: Protocol) -> Self {
        Self { port, protocol }
    }

    /// TCP port
    pub const fn tcp(port: u16) -> Self {
        Self::new(port, Protocol::Tcp)
    }

    /// UDP port
    pub const fn udp(port: u16) -> Self {
        Self::new(port, Protocol::Udp)
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

impl FromStr for PortSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (port, protocol) = s
            .split_once('/')
            .ok_or_else(|| Error::validation(format!("port {s:?} must look like 4500/udp")))?;
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|e| Error::validation(format!("invalid port in {s:?}: {e}")))?;
        Ok(Self::new(port, protocol.trim().parse()?))
    }
}

// =============================================================================
// Deploy request
// =============================================================================

/// How gateways are provided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayMode {
    /// New compute instances created only for the gateway role
    Dedicated,
    /// Existing worker nodes marked with the gateway label
    Labeled,
}

impl fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayMode::Dedicated => f.write_str("dedicated"),
            GatewayMode::Labeled => f.write_str("labeled"),
        }
    }
}

/// Input of a gateway deployment. Built per call, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayDeployRequest {
    /// How many gateways should exist after the call
    pub desired_gateway_count: usize,
    /// Ports opened to the outside world on gateways
    #[serde(default)]
    pub public_ports: Vec<PortSpec>,
    /// Create dedicated instances instead of labeling workers
    #[serde(default)]
    pub use_dedicated_nodes: bool,
    /// Gateways must not get a public IP
    #[serde(default)]
    pub air_gapped: bool,
}

impl GatewayDeployRequest {
    /// A labeled-mode request for `count` gateways
    pub fn new(count: usize) -> Self {
        Self {
            desired_gateway_count: count,
            ..Default::default()
        }
    }

    /// Set the public ports
    pub fn with_public_ports(mut self, ports: impl IntoIterator<Item = PortSpec>) -> Self {
        self.public_ports = ports.into_iter().collect();
        self
    }

    /// Request dedicated gateway instances
    pub fn dedicated(mut self) -> Self {
        self.use_dedicated_nodes = true;
        self
    }

    /// Request gateways without public IPs
    pub fn air_gapped(mut self) -> Self {
        self.air_gapped = true;
        self
    }

    /// The gateway mode this request asks for
    pub fn mode(&self) -> GatewayMode {
        if self.use_dedicated_nodes {
            GatewayMode::Dedicated
        } else {
            GatewayMode::Labeled
        }
    }
}

// =============================================================================
// Gateways
// =============================================================================

/// What backs a gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayKind {
    /// Dedicated instance or machine set
    Dedicated,
    /// Existing node carrying the gateway label
    LabeledNode,
}

/// An existing gateway as seen by the provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GatewayResource {
    /// Machine set, instance or node name
    pub name: String,
    /// Zone hosting the gateway, when known
    pub zone: Option<String>,
    /// Dedicated instance or labeled node
    pub kind: GatewayKind,
}

impl GatewayResource {
    /// A dedicated gateway in `zone`
    pub fn dedicated(name: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            zone: Some(zone.into()),
            kind: GatewayKind::Dedicated,
        }
    }

    /// A labeled node, optionally with its zone
    pub fn labeled(name: impl Into<String>, zone: Option<String>) -> Self {
        Self {
            name: name.into(),
            zone,
            kind: GatewayKind::LabeledNode,
        }
    }
}

// =============================================================================
// Security rules
// =============================================================================

/// Traffic direction of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Inbound
    Ingress,
    /// Outbound
    Egress,
}

impl Direction {
    /// Lowercase name used in generated rule names
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        }
    }
}

/// Which managed rule set a rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleSetKind {
    /// Intra-cluster ports between nodes
    Internal,
    /// Public ports on gateways
    External,
}

impl RuleSetKind {
    /// Rule-name prefix that marks rules of this set as managed
    pub fn prefix(&self) -> &'static str {
        match self {
            RuleSetKind::Internal => INTERNAL_RULE_PREFIX,
            RuleSetKind::External => EXTERNAL_RULE_PREFIX,
        }
    }
}

impl fmt::Display for RuleSetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSetKind::Internal => f.write_str("internal"),
            RuleSetKind::External => f.write_str("external"),
        }
    }
}

/// A single firewall or security-group rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityRule {
    /// Rule name; managed rules start with a [`RuleSetKind`] prefix
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Direction
    pub direction: Direction,
    /// Port and protocol
    pub port: PortSpec,
    /// Source (ingress) or destination (egress) address prefix; `*` when unset
    #[serde(default)]
    pub address_prefix: Option<String>,
    /// Priority for providers that order rules
    #[serde(default)]
    pub priority: Option<u32>,
}

impl SecurityRule {
    /// Name like `Submariner-Internal-udp-4500-ingress`
    pub fn managed_name(kind: RuleSetKind, port: PortSpec, direction: Direction) -> String {
        format!(
            "{}{}-{}-{}",
            kind.prefix(),
            port.protocol,
            port.port,
            direction.as_str()
        )
    }

    /// A managed rule of `kind` for `port`
    pub fn managed(kind: RuleSetKind, port: PortSpec, direction: Direction) -> Self {
        Self {
            name: Self::managed_name(kind, port, direction),
            description: String::new(),
            direction,
            port,
            address_prefix: None,
            priority: None,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the address prefix
    pub fn with_address_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.address_prefix = Some(prefix.into());
        self
    }

    /// True when the rule name carries `prefix`
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.name.contains(prefix)
    }
}

/// A named collection of rules as stored by a provider
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleGroup {
    /// Group name (security group, NSG or firewall name)
    pub name: String,
    /// Provider identifier, when different from the name
    pub id: Option<String>,
    /// All rules in the group, managed or not
    pub rules: Vec<SecurityRule>,
}

impl RuleGroup {
    /// An empty group
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// True when any rule carries `prefix`
    pub fn has_rules_with_prefix(&self, prefix: &str) -> bool {
        self.rules.iter().any(|r| r.has_prefix(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::udp("4500/udp", PortSpec::udp(4500))]
    #[case::tcp("8080/tcp", PortSpec::tcp(8080))]
    #[case::uppercase("4800/UDP", PortSpec::udp(4800))]
    #[case::spaces(" 500 / udp ", PortSpec::udp(500))]
    fn test_port_spec_parses(#[case] input: &str, #[case] expected: PortSpec) {
        assert_eq!(input.parse::<PortSpec>().unwrap(), expected);
    }

    #[rstest]
    #[case::missing_protocol("4500")]
    #[case::bad_protocol("4500/sctp")]
    #[case::out_of_range("70000/udp")]
    #[case::not_a_number("ipsec/udp")]
    fn test_port_spec_rejects(#[case] input: &str) {
        assert!(matches!(
            input.parse::<PortSpec>(),
            Err(Error::Validation { .. })
        ));
    }

    #[test]
    fn test_port_spec_display() {
        assert_eq!(PortSpec::udp(4500).to_string(), "4500/udp");
        assert_eq!(PortSpec::tcp(8080).to_string(), "8080/tcp");
    }

    #[test]
    fn test_request_mode() {
        assert_eq!(GatewayDeployRequest::new(1).mode(), GatewayMode::Labeled);
        assert_eq!(
            GatewayDeployRequest::new(1).dedicated().mode(),
            GatewayMode::Dedicated
        );
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let req: GatewayDeployRequest = serde_json::from_str(
            r#"{"desiredGatewayCount": 2, "publicPorts": [{"port": 4500, "protocol": "udp"}], "useDedicatedNodes": true}"#,
        )
        .unwrap();
        assert_eq!(req.desired_gateway_count, 2);
        assert_eq!(req.public_ports, vec![PortSpec::udp(4500)]);
        assert!(req.use_dedicated_nodes);
        assert!(!req.air_gapped);
    }

    #[test]
    fn test_managed_rule_names_carry_prefix() {
        let rule = SecurityRule::managed(RuleSetKind::External, PortSpec::udp(4500), Direction::Ingress);
        assert_eq!(rule.name, "Submariner-External-udp-4500-ingress");
        assert!(rule.has_prefix(RuleSetKind::External.prefix()));
        assert!(!rule.has_prefix(RuleSetKind::Internal.prefix()));
    }

    #[test]
    fn test_group_prefix_detection() {
        let mut group = RuleGroup::new("nsg");
        assert!(!group.has_rules_with_prefix(INTERNAL_RULE_PREFIX));
        group.rules.push(SecurityRule::managed(
            RuleSetKind::Internal,
            PortSpec::tcp(8080),
            Direction::Egress,
        ));
        assert!(group.has_rules_with_prefix(INTERNAL_RULE_PREFIX));
        assert!(!group.has_rules_with_prefix(EXTERNAL_RULE_PREFIX));
    }
}
