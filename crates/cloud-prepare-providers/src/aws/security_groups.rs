//! Internal cluster rules and the gateway security group.

use tracing::{debug, info};

use cloud_prepare_common::{
    retry_with_backoff, Error, PortSpec, Result, INTERNAL_TRAFFIC_DESCRIPTION,
};
use cloud_prepare_gateway::Reconciled;

use super::client::{Ec2Api, Filter, GroupPair, IpPermission, IpRange, SecurityGroup};
use super::{AwsCloud, PROVIDER};
use crate::wrap;

pub(crate) const PUBLIC_TRAFFIC_DESCRIPTION: &str = "Public Submariner traffic";
const GATEWAY_GROUP_DESCRIPTION: &str = "Submariner Gateway";

/// Security group name suffixes of one installer generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GroupSuffixes {
    pub worker: &'static str,
    pub control_plane: &'static str,
}

const NODE_SUFFIXES: GroupSuffixes = GroupSuffixes {
    worker: "-node",
    control_plane: "-controlplane",
};

const LEGACY_SUFFIXES: GroupSuffixes = GroupSuffixes {
    worker: "-worker-sg",
    control_plane: "-master-sg",
};

/// Newer installers name public subnets `{infraID}*-subnet-public-{region}*`
/// and their groups `-node` / `-controlplane`
pub(crate) fn detect_suffixes<'a>(
    subnet_names: impl IntoIterator<Item = &'a str>,
    infra_id: &str,
    region: &str,
) -> GroupSuffixes {
    let marker = format!("-subnet-public-{region}");
    let newer = subnet_names.into_iter().any(|name| {
        name.find(infra_id)
            .is_some_and(|i| name[i + infra_id.len()..].contains(&marker))
    });
    if newer {
        NODE_SUFFIXES
    } else {
        LEGACY_SUFFIXES
    }
}

fn port_permission(port: PortSpec) -> IpPermission {
    IpPermission {
        protocol: port.protocol.as_str().to_string(),
        from_port: port.port,
        to_port: port.port,
        ..Default::default()
    }
}

fn cluster_permission(port: PortSpec, source_group: &str, description: String) -> IpPermission {
    IpPermission {
        group_pairs: vec![GroupPair {
            group_id: source_group.to_string(),
            description: Some(description),
        }],
        ..port_permission(port)
    }
}

fn public_permission(port: PortSpec) -> IpPermission {
    IpPermission {
        ip_ranges: vec![IpRange {
            cidr: "0.0.0.0/0".to_string(),
            description: Some(PUBLIC_TRAFFIC_DESCRIPTION.to_string()),
        }],
        ..port_permission(port)
    }
}

/// The worker and control-plane groups of a cluster
pub(crate) struct ClusterGroups {
    pub worker: SecurityGroup,
    pub control_plane: SecurityGroup,
}

impl<C: Ec2Api> AwsCloud<C> {
    pub(crate) async fn group_suffixes(&self, vpc_id: &str) -> Result<GroupSuffixes> {
        let subnets = self.public_subnets(vpc_id).await?;
        if subnets.is_empty() {
            return Err(Error::not_found(
                "public subnet",
                self.naming.render("{infraID}-public-{region}*"),
            ));
        }
        Ok(detect_suffixes(
            subnets.iter().filter_map(|s| s.name()),
            self.naming.infra_id(),
            self.naming.region(),
        ))
    }

    /// Look up a group by `Name` tag inside the VPC
    pub(crate) async fn find_group(&self, vpc_id: &str, name: &str) -> Result<Option<SecurityGroup>> {
        let groups = self
            .ec2
            .describe_security_groups(vec![Filter::vpc(vpc_id), Filter::name_tag(name)])
            .await
            .map_err(wrap(PROVIDER, "describe security groups", name))?;
        Ok(groups.into_iter().next())
    }

    async fn group_by_id(&self, group_id: &str) -> Result<SecurityGroup> {
        let groups = self
            .ec2
            .describe_security_groups_by_id(vec![group_id.to_string()])
            .await
            .map_err(wrap(PROVIDER, "describe security group", group_id))?;
        groups
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("security group", group_id))
    }

    async fn required_group(&self, vpc_id: &str, configured: Option<&str>, name: String) -> Result<SecurityGroup> {
        match configured {
            Some(id) => self.group_by_id(id).await,
            None => self
                .find_group(vpc_id, &name)
                .await?
                .ok_or_else(|| Error::not_found("security group", name)),
        }
    }

    pub(crate) async fn cluster_groups(&self, vpc_id: &str) -> Result<ClusterGroups> {
        let configured_worker = self.aws.worker_security_group.as_deref();
        let configured_control_plane = self.aws.control_plane_security_group.as_deref();

        let suffixes = if configured_worker.is_some() && configured_control_plane.is_some() {
            LEGACY_SUFFIXES
        } else {
            self.group_suffixes(vpc_id).await?
        };

        let infra_id = self.naming.infra_id();
        let worker = self
            .required_group(vpc_id, configured_worker, format!("{infra_id}{}", suffixes.worker))
            .await?;
        let control_plane = self
            .required_group(
                vpc_id,
                configured_control_plane,
                format!("{infra_id}{}", suffixes.control_plane),
            )
            .await?;
        Ok(ClusterGroups {
            worker,
            control_plane,
        })
    }

    async fn authorize(&self, group_id: &str, permissions: Vec<IpPermission>) -> Result<()> {
        match self.ec2.authorize_ingress(group_id, permissions).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_already_exists() => {
                debug!(group = %group_id, "Permission already present");
                Ok(())
            }
            Err(e) => Err(wrap(PROVIDER, "authorize security group ingress", group_id)(e)),
        }
    }

    /// Allow `ports` between workers and between workers and the control plane.
    ///
    /// Skipped entirely when the worker group already carries internal
    /// Submariner permissions.
    pub(crate) async fn ensure_internal_rules(&self, ports: &[PortSpec]) -> Result<Reconciled> {
        let vpc = self.vpc().await?;
        let groups = self.cluster_groups(&vpc.id).await?;
        self.validate_authorize(&groups.worker.id).await?;

        let managed = groups
            .worker
            .permissions
            .iter()
            .any(|p| p.described_as(INTERNAL_TRAFFIC_DESCRIPTION));
        if managed {
            debug!(group = %groups.worker.id, "Internal ports already open");
            return Ok(Reconciled::Noop);
        }

        let worker = groups.worker.id.as_str();
        let control_plane = groups.control_plane.id.as_str();
        for &port in ports {
            self.authorize(
                worker,
                vec![cluster_permission(
                    port,
                    worker,
                    format!("{INTERNAL_TRAFFIC_DESCRIPTION} between the workers"),
                )],
            )
            .await?;
            self.authorize(
                control_plane,
                vec![cluster_permission(
                    port,
                    worker,
                    format!("{INTERNAL_TRAFFIC_DESCRIPTION} from worker to master nodes"),
                )],
            )
            .await?;
            self.authorize(
                worker,
                vec![cluster_permission(
                    port,
                    control_plane,
                    format!("{INTERNAL_TRAFFIC_DESCRIPTION} from master to worker nodes"),
                )],
            )
            .await?;
            info!(port = %port, "Opened port for intra-cluster traffic");
        }
        Ok(Reconciled::Applied)
    }

    async fn revoke_described(&self, group: &SecurityGroup, description: &str) -> Result<bool> {
        let permissions: Vec<IpPermission> = group
            .permissions
            .iter()
            .filter(|p| p.described_as(description))
            .cloned()
            .collect();
        if permissions.is_empty() {
            return Ok(false);
        }
        self.ec2
            .revoke_ingress(&group.id, permissions)
            .await
            .map_err(wrap(PROVIDER, "revoke security group ingress", &group.id))?;
        Ok(true)
    }

    /// Revoke every internal Submariner permission from the cluster groups
    pub(crate) async fn remove_internal_rules(&self) -> Result<Reconciled> {
        let vpc = self.vpc().await?;
        let groups = self.cluster_groups(&vpc.id).await?;
        self.validate_revoke(&groups.worker.id).await?;

        let worker = self
            .revoke_described(&groups.worker, INTERNAL_TRAFFIC_DESCRIPTION)
            .await?;
        let control_plane = self
            .revoke_described(&groups.control_plane, INTERNAL_TRAFFIC_DESCRIPTION)
            .await?;
        if worker || control_plane {
            info!("Revoked intra-cluster permissions");
            Ok(Reconciled::Applied)
        } else {
            Ok(Reconciled::Noop)
        }
    }

    /// Create the gateway group if needed and open `ports` to the world
    pub(crate) async fn ensure_gateway_group(&self, vpc_id: &str, ports: &[PortSpec]) -> Result<Reconciled> {
        let name = self.naming.gateway_security_group();
        let group = match self.find_group(vpc_id, &name).await? {
            Some(group) => group,
            None => self.create_gateway_group(vpc_id, &name).await?,
        };

        if group
            .permissions
            .iter()
            .any(|p| p.described_as(PUBLIC_TRAFFIC_DESCRIPTION))
        {
            debug!(group = %name, "Public ports already open");
            return Ok(Reconciled::Noop);
        }

        for &port in ports {
            self.authorize(&group.id, vec![public_permission(port)]).await?;
        }
        info!(group = %name, ports = ports.len(), "Opened public gateway ports");
        Ok(Reconciled::Applied)
    }

    async fn create_gateway_group(&self, vpc_id: &str, name: &str) -> Result<SecurityGroup> {
        match self
            .ec2
            .create_security_group(vpc_id, name, GATEWAY_GROUP_DESCRIPTION)
            .await
        {
            Ok(id) => {
                info!(group = %name, id = %id, "Created gateway security group");
                Ok(SecurityGroup {
                    id,
                    name: name.to_string(),
                    permissions: vec![],
                })
            }
            // lost a race with a concurrent create
            Err(e) if e.is_already_exists() => self
                .find_group(vpc_id, name)
                .await?
                .ok_or_else(|| Error::not_found("security group", name)),
            Err(e) => Err(wrap(PROVIDER, "create security group", name)(e)),
        }
    }

    /// Revoke the public permissions of the gateway group, keeping the group
    pub(crate) async fn revoke_gateway_rules(&self, vpc_id: &str) -> Result<Reconciled> {
        let name = self.naming.gateway_security_group();
        let Some(group) = self.find_group(vpc_id, &name).await? else {
            return Ok(Reconciled::Noop);
        };
        if self.revoke_described(&group, PUBLIC_TRAFFIC_DESCRIPTION).await? {
            Ok(Reconciled::Applied)
        } else {
            Ok(Reconciled::Noop)
        }
    }

    /// Delete the gateway group, retrying while terminating instances still use it
    pub(crate) async fn delete_gateway_group(&self, vpc_id: &str) -> Result<Reconciled> {
        let name = self.naming.gateway_security_group();
        let Some(group) = self.find_group(vpc_id, &name).await? else {
            return Ok(Reconciled::Noop);
        };

        let ec2 = &self.ec2;
        let id = group.id.as_str();
        let result = retry_with_backoff(
            &self.retry.security_group_delete,
            "delete_gateway_security_group",
            || async move {
                ec2.delete_security_group(id)
                    .await
                    .map_err(wrap(PROVIDER, "delete security group", id))
            },
        )
        .await;

        match result {
            Ok(()) => {
                info!(group = %name, "Deleted gateway security group");
                Ok(Reconciled::Applied)
            }
            Err(e) if e.is_not_found() => Ok(Reconciled::Noop),
            Err(e) => Err(e),
        }
    }
}
