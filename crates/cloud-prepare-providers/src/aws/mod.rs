//! AWS adapter.
//!
//! Every resource is found through the installer's naming and tagging
//! conventions: the VPC is `{infraID}-vpc` tagged
//! `kubernetes.io/cluster/{infraID}=owned`, public subnets are
//! `{infraID}-public-{region}*`, and worker / control-plane security groups
//! follow one of two suffix schemes depending on the installer version.

pub mod client;
mod gateway;
mod peering;
mod security_groups;
mod subnets;
mod validations;

use std::time::Duration;

use async_trait::async_trait;

use cloud_prepare_common::config::{AwsConfig, GatewayConfig};
use cloud_prepare_common::{
    CloudConfig, Error, Naming, PortSpec, ProviderConfig, Result, RetryPolicy,
};
use cloud_prepare_gateway::{CloudPorts, CloudResource, ResourceKind, ResourceLocator};

pub use client::{DryRun, Ec2Api, Filter, Tag};
pub use gateway::{AwsGatewayProvider, PREFERRED_INSTANCES};
pub use validations::cidrs_overlap;

use client::{Subnet, Vpc};

pub(crate) const PROVIDER: &str = "aws";

/// Retry policies for calls that race EC2 eventual consistency
#[derive(Debug, Clone, Copy)]
pub struct AwsRetryPolicies {
    /// Accepting a peering and creating its routes
    pub peering: RetryPolicy,
    /// Deleting the gateway security group while instances still hold it
    pub security_group_delete: RetryPolicy,
}

fn dependency_violation(err: &Error) -> bool {
    err.api_error()
        .is_some_and(|e| e.is_code("DependencyViolation"))
}

impl Default for AwsRetryPolicies {
    fn default() -> Self {
        Self {
            peering: RetryPolicy::fixed(3, Duration::from_secs(10)),
            security_group_delete: RetryPolicy::exponential(
                30,
                Duration::from_millis(500),
                1.2,
                Duration::from_secs(600),
            )
            .retry_if(dependency_violation),
        }
    }
}

/// One AWS cluster: its EC2 client, naming and overrides
pub struct AwsCloud<C> {
    ec2: C,
    naming: Naming,
    aws: AwsConfig,
    gateway: GatewayConfig,
    retry: AwsRetryPolicies,
}

impl<C: Ec2Api> AwsCloud<C> {
    /// Create the adapter for a cluster configured with the `aws` provider
    pub fn new(ec2: C, config: &CloudConfig) -> Result<Self> {
        let ProviderConfig::Aws(aws) = &config.provider else {
            return Err(Error::config(format!(
                "expected aws provider configuration, got {}",
                config.provider.name()
            )));
        };
        config.validate()?;
        Ok(Self {
            ec2,
            naming: config.naming(),
            aws: aws.clone(),
            gateway: config.gateway.clone(),
            retry: AwsRetryPolicies::default(),
        })
    }

    /// Replace the retry policies
    pub fn with_retry_policies(mut self, retry: AwsRetryPolicies) -> Self {
        self.retry = retry;
        self
    }

    /// Cluster naming
    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    fn vpc_name(&self) -> String {
        match &self.aws.vpc_name {
            Some(name) => name.clone(),
            None => self.naming.render("{infraID}-vpc"),
        }
    }

    /// The cluster VPC. Its absence is fatal.
    pub(crate) async fn vpc(&self) -> Result<Vpc> {
        let name = self.vpc_name();
        let filters = vec![
            Filter::name_tag(&name),
            Filter::owned_by(self.naming.infra_id()),
        ];
        let vpcs = self
            .ec2
            .describe_vpcs(filters)
            .await
            .map_err(crate::wrap(PROVIDER, "describe vpcs", &name))?;
        vpcs.into_iter()
            .next()
            .ok_or_else(|| Error::not_found("vpc", name))
    }
}

fn subnet_resource(subnet: Subnet) -> CloudResource {
    let name = subnet.name().unwrap_or_default().to_string();
    let resource = CloudResource::new(&subnet.id, name).in_zone(&subnet.availability_zone);
    subnet
        .tags
        .into_iter()
        .fold(resource, |r, tag| r.with_tag(tag.key, tag.value))
}

/// Lookups are scoped to the cluster: VPCs must be owned by the infra ID
/// and subnets and security groups must live in the cluster VPC.
#[async_trait]
impl<C: Ec2Api> ResourceLocator for AwsCloud<C> {
    async fn find_by_name(&self, kind: ResourceKind, name: &str) -> Result<Option<CloudResource>> {
        match kind {
            ResourceKind::Vpc => {
                let filters = vec![Filter::name_tag(name), Filter::owned_by(self.naming.infra_id())];
                let vpcs = self
                    .ec2
                    .describe_vpcs(filters)
                    .await
                    .map_err(crate::wrap(PROVIDER, "describe vpcs", name))?;
                Ok(vpcs.into_iter().next().map(|v| CloudResource::new(v.id, name)))
            }
            ResourceKind::Subnet => {
                let vpc = self.vpc().await?;
                let filters = vec![Filter::vpc(&vpc.id), Filter::name_tag(name)];
                let subnets = self
                    .ec2
                    .describe_subnets(filters)
                    .await
                    .map_err(crate::wrap(PROVIDER, "describe subnets", name))?;
                Ok(subnets.into_iter().next().map(subnet_resource))
            }
            ResourceKind::SecurityGroup => {
                let vpc = self.vpc().await?;
                let filters = vec![Filter::vpc(&vpc.id), Filter::name_tag(name)];
                let groups = self
                    .ec2
                    .describe_security_groups(filters)
                    .await
                    .map_err(crate::wrap(PROVIDER, "describe security groups", name))?;
                Ok(groups.into_iter().next().map(|g| CloudResource::new(g.id, g.name)))
            }
            other => Err(Error::unsupported(format!("aws cannot look up {other} by name"))),
        }
    }

    async fn find_by_tag(&self, kind: ResourceKind, tag_prefix: &str) -> Result<Vec<CloudResource>> {
        if kind != ResourceKind::Subnet {
            return Err(Error::unsupported(format!("aws cannot look up {kind} by tag")));
        }
        let vpc = self.vpc().await?;
        let subnets = self
            .ec2
            .describe_subnets(vec![Filter::vpc(&vpc.id)])
            .await
            .map_err(crate::wrap(PROVIDER, "describe subnets", &vpc.id))?;
        Ok(subnets
            .into_iter()
            .filter(|s| s.tags.iter().any(|t| t.key.starts_with(tag_prefix)))
            .map(subnet_resource)
            .collect())
    }
}

#[async_trait]
impl<C: Ec2Api> CloudPorts for AwsCloud<C> {
    async fn open_ports(&self, ports: &[PortSpec]) -> Result<()> {
        self.ensure_internal_rules(ports).await.map(|_| ())
    }

    async fn close_ports(&self) -> Result<()> {
        self.remove_internal_rules().await.map(|_| ())
    }
}
