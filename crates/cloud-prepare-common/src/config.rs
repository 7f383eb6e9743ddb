//! Cluster configuration.
//!
//! A [`CloudConfig`] is loaded once (YAML file and/or CLI flags) and handed
//! to adapters by value. Nothing reads configuration from global state.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::naming::Naming;
use crate::{Error, Result};

/// Immutable per-cluster configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudConfig {
    /// Cluster infra ID used to name and tag every managed resource
    pub infra_id: String,
    /// Cloud region
    #[serde(default)]
    pub region: String,
    /// Gateway instance settings
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Provider-specific settings
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Settings for dedicated gateway instances
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Instance type; providers pick a default when unset
    #[serde(default)]
    pub instance_type: Option<String>,
    /// Image; providers copy the worker image when unset
    #[serde(default)]
    pub image: Option<String>,
}

/// Per-provider settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    /// Amazon Web Services
    Aws(AwsConfig),
    /// Google Cloud
    Gcp(GcpConfig),
    /// Microsoft Azure
    Azure(AzureConfig),
    /// Red Hat OpenStack
    Rhos(RhosConfig),
    /// Any Kubernetes cluster, no cloud API
    #[default]
    Generic,
}

impl ProviderConfig {
    /// Provider name as used in errors and logs
    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::Aws(_) => "aws",
            ProviderConfig::Gcp(_) => "gcp",
            ProviderConfig::Azure(_) => "azure",
            ProviderConfig::Rhos(_) => "rhos",
            ProviderConfig::Generic => "generic",
        }
    }
}

/// AWS overrides for clusters that do not follow installer naming
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsConfig {
    /// VPC name; defaults to `{infraID}-vpc`
    #[serde(default)]
    pub vpc_name: Option<String>,
    /// Worker security group ID
    #[serde(default)]
    pub worker_security_group: Option<String>,
    /// Control-plane security group ID
    #[serde(default)]
    pub control_plane_security_group: Option<String>,
    /// Public subnet IDs usable for gateways
    #[serde(default)]
    pub public_subnets: Vec<String>,
}

/// GCP settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpConfig {
    /// Project ID
    pub project_id: String,
}

/// Azure settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureConfig {
    /// Subscription ID
    pub subscription_id: String,
    /// Resource group; defaults to `{infraID}-rg`
    #[serde(default)]
    pub resource_group: Option<String>,
}

/// OpenStack settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RhosConfig {
    /// Project ID
    pub project_id: String,
}

impl CloudConfig {
    /// Configuration for the generic provider
    pub fn generic(infra_id: impl Into<String>) -> Self {
        Self {
            infra_id: infra_id.into(),
            region: String::new(),
            gateway: GatewayConfig::default(),
            provider: ProviderConfig::Generic,
        }
    }

    /// Configuration for a cloud provider in `region`
    pub fn new(infra_id: impl Into<String>, region: impl Into<String>, provider: ProviderConfig) -> Self {
        Self {
            infra_id: infra_id.into(),
            region: region.into(),
            gateway: GatewayConfig::default(),
            provider,
        }
    }

    /// Parse configuration from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| Error::config(format!("invalid YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_yaml(&yaml)
    }

    /// Reject configuration that cannot name resources
    pub fn validate(&self) -> Result<()> {
        if self.infra_id.trim().is_empty() {
            return Err(Error::validation_for_field("infraId", "must not be empty"));
        }
        let needs_region = !matches!(self.provider, ProviderConfig::Generic);
        if needs_region && self.region.trim().is_empty() {
            return Err(Error::validation_for_field(
                "region",
                format!("required for provider {}", self.provider.name()),
            ));
        }
        match &self.provider {
            ProviderConfig::Gcp(gcp) if gcp.project_id.is_empty() => {
                Err(Error::validation_for_field("provider.projectId", "must not be empty"))
            }
            ProviderConfig::Rhos(rhos) if rhos.project_id.is_empty() => {
                Err(Error::validation_for_field("provider.projectId", "must not be empty"))
            }
            ProviderConfig::Azure(azure) if azure.subscription_id.is_empty() => Err(
                Error::validation_for_field("provider.subscriptionId", "must not be empty"),
            ),
            _ => Ok(()),
        }
    }

    /// Name renderer for this cluster
    pub fn naming(&self) -> Naming {
        Naming::new(&self.infra_id, &self.region)
    }
}
