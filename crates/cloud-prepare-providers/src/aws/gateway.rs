//! Dedicated AWS gateways: one machine set per public subnet tagged as a
//! gateway subnet.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info};

use cloud_prepare_common::{
    Error, GatewayDeployRequest, GatewayMode, GatewayResource, PortSpec, Result, RuleSetKind,
    GATEWAY_LABEL,
};
use cloud_prepare_gateway::{
    eligible_placements, GatewayProvider, Placement, Reconciled, ZoneCandidate,
};
use cloud_prepare_k8s::{
    MachineSetDeployer, MachineSetTemplate, MachineSetVars, MACHINE_API_NAMESPACE,
};

use super::client::{Ec2Api, Filter, Subnet};
use super::{AwsCloud, PROVIDER};
use crate::wrap;

/// Instance types tried in order when none is configured
pub const PREFERRED_INSTANCES: [&str; 2] = ["c5d.large", "m5n.large"];

impl<C: Ec2Api> AwsCloud<C> {
    fn instance_type_candidates(&self) -> Vec<String> {
        match &self.gateway.instance_type {
            Some(instance_type) => vec![instance_type.clone()],
            None => PREFERRED_INSTANCES.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// First candidate instance type offered in `zone`, in preference order
    async fn offered_instance_type(&self, zone: &str) -> Result<Option<String>> {
        let candidates = self.instance_type_candidates();
        let offered = self
            .ec2
            .describe_instance_type_offerings(zone, candidates.clone())
            .await
            .map_err(wrap(PROVIDER, "describe instance type offerings", zone))?;
        Ok(candidates.into_iter().find(|c| offered.contains(c)))
    }

    /// AMI of a running worker, used when no gateway image is configured
    async fn worker_image(&self, vpc_id: &str) -> Result<String> {
        if let Some(image) = &self.gateway.image {
            return Ok(image.clone());
        }
        let pattern = self.naming.render("{infraID}-worker*");
        let instances = self
            .ec2
            .describe_instances(vec![
                Filter::vpc(vpc_id),
                Filter::name_tag(&pattern),
                Filter::owned_by(self.naming.infra_id()),
            ])
            .await
            .map_err(wrap(PROVIDER, "describe instances", &pattern))?;
        instances
            .into_iter()
            .find_map(|i| i.image_id)
            .ok_or_else(|| Error::not_found("worker AMI", pattern))
    }

    async fn subnet(&self, subnet_id: &str) -> Result<Subnet> {
        self.ec2
            .describe_subnets_by_id(vec![subnet_id.to_string()])
            .await
            .map_err(wrap(PROVIDER, "describe subnet", subnet_id))?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("subnet", subnet_id))
    }

    async fn first_public_subnet(&self, vpc_id: &str) -> Result<Subnet> {
        self.public_subnets(vpc_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::not_found("public subnet", self.naming.render("{infraID}*-public-{region}*")))
    }
}

/// Gateways as OpenShift machine sets in the cluster's public subnets
pub struct AwsGatewayProvider<C, M> {
    cloud: AwsCloud<C>,
    machine_sets: M,
}

impl<C: Ec2Api, M: MachineSetDeployer> AwsGatewayProvider<C, M> {
    /// Create a provider deploying machine sets through `machine_sets`
    pub fn new(cloud: AwsCloud<C>, machine_sets: M) -> Self {
        Self {
            cloud,
            machine_sets,
        }
    }

    /// The underlying cluster adapter
    pub fn cloud(&self) -> &AwsCloud<C> {
        &self.cloud
    }
}

#[async_trait]
impl<C: Ec2Api, M: MachineSetDeployer> GatewayProvider for AwsGatewayProvider<C, M> {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn supports(&self, mode: GatewayMode) -> bool {
        mode == GatewayMode::Dedicated
    }

    async fn prepare_deploy(&self) -> Result<()> {
        let cloud = &self.cloud;
        let vpc = cloud.vpc().await?;
        cloud.validate_create_group(&vpc.id).await?;
        let groups = cloud.cluster_groups(&vpc.id).await?;
        cloud.validate_authorize(&groups.worker.id).await?;
        cloud.validate_describe_offerings().await?;
        let subnet = cloud.first_public_subnet(&vpc.id).await?;
        cloud.validate_create_tags(&subnet.id).await
    }

    async fn prepare_cleanup(&self) -> Result<()> {
        let cloud = &self.cloud;
        let vpc = cloud.vpc().await?;
        let groups = cloud.cluster_groups(&vpc.id).await?;
        cloud.validate_delete_group(&groups.worker.id).await?;
        cloud.validate_revoke(&groups.worker.id).await?;
        let subnet = cloud.first_public_subnet(&vpc.id).await?;
        cloud.validate_delete_tags(&subnet.id).await
    }

    async fn locate_existing(&self) -> Result<Vec<GatewayResource>> {
        let vpc = self.cloud.vpc().await?;
        let subnets = self.cloud.gateway_subnets(&vpc.id).await?;
        Ok(subnets
            .into_iter()
            .map(|s| {
                let name = self.cloud.naming.gateway_name(&s.availability_zone);
                GatewayResource::dedicated(name, s.availability_zone)
            })
            .collect())
    }

    async fn ensure_rule_set(&self, kind: RuleSetKind, ports: &[PortSpec]) -> Result<Reconciled> {
        match kind {
            RuleSetKind::Internal => self.cloud.ensure_internal_rules(ports).await,
            RuleSetKind::External => {
                let vpc = self.cloud.vpc().await?;
                self.cloud.ensure_gateway_group(&vpc.id, ports).await
            }
        }
    }

    async fn remove_rule_set(&self, kind: RuleSetKind) -> Result<Reconciled> {
        match kind {
            RuleSetKind::Internal => self.cloud.remove_internal_rules().await,
            RuleSetKind::External => {
                let vpc = self.cloud.vpc().await?;
                self.cloud.revoke_gateway_rules(&vpc.id).await
            }
        }
    }

    async fn resolve_placement(
        &self,
        _mode: GatewayMode,
        existing: &[GatewayResource],
    ) -> Result<Vec<Placement>> {
        let vpc = self.cloud.vpc().await?;
        let subnets = self.cloud.public_subnets(&vpc.id).await?;
        let mut occupied: HashSet<String> =
            existing.iter().filter_map(|g| g.zone.clone()).collect();

        let mut candidates = Vec::with_capacity(subnets.len());
        for subnet in subnets {
            let zone = subnet.availability_zone.clone();
            let hosts_gateway = subnet.has_tag(GATEWAY_LABEL) || occupied.contains(&zone);
            let instance_type = if hosts_gateway {
                None
            } else {
                self.cloud.offered_instance_type(&zone).await?
            };
            if instance_type.is_none() && !hosts_gateway {
                debug!(zone = %zone, subnet = %subnet.id, "No gateway instance type offered");
            }
            let has_capacity = instance_type.is_some();
            if has_capacity {
                // one gateway per zone even with several public subnets
                occupied.insert(zone.clone());
            }
            candidates.push(ZoneCandidate {
                id: Placement::Zone {
                    zone,
                    subnet: Some(subnet.id),
                    instance_type,
                },
                has_capacity,
                hosts_gateway,
            });
        }
        Ok(eligible_placements(candidates))
    }

    async fn create_gateway(
        &self,
        placement: &Placement,
        request: &GatewayDeployRequest,
    ) -> Result<GatewayResource> {
        let Placement::Zone {
            zone,
            subnet: Some(subnet_id),
            instance_type,
        } = placement
        else {
            return Err(Error::unsupported(format!(
                "aws gateways need a public subnet, got placement {placement}"
            )));
        };

        let cloud = &self.cloud;
        let vpc = cloud.vpc().await?;
        let image = cloud.worker_image(&vpc.id).await?;
        let subnet = cloud.subnet(subnet_id).await?;
        let subnet_name = subnet
            .name()
            .ok_or_else(|| Error::not_found("subnet name tag", subnet_id))?;

        let name = cloud.naming.gateway_name(zone);
        let mut vars = MachineSetVars::new(&name, cloud.naming.infra_id(), cloud.naming.region());
        vars.zone = zone.clone();
        vars.instance_type = instance_type
            .clone()
            .or_else(|| cloud.gateway.instance_type.clone())
            .unwrap_or_else(|| PREFERRED_INSTANCES[0].to_string());
        vars.image = image;
        vars.security_group = Some(cloud.naming.gateway_security_group());
        vars.subnet = Some(subnet_name.to_string());
        vars.public_ip = !request.air_gapped;

        let machine_set = MachineSetTemplate::Aws.render(&vars)?;
        self.machine_sets.deploy(&machine_set).await?;

        if !subnet.has_tag(GATEWAY_LABEL) {
            cloud.tag_gateway_subnet(&subnet.id).await?;
        }
        info!(gateway = %name, zone = %zone, instance_type = %vars.instance_type, "Deployed gateway machine set");
        Ok(GatewayResource::dedicated(name, zone.clone()))
    }

    async fn delete_gateway(&self, gateway: &GatewayResource) -> Result<()> {
        self.machine_sets
            .delete(MACHINE_API_NAMESPACE, &gateway.name)
            .await?;

        let Some(zone) = &gateway.zone else {
            return Ok(());
        };
        let vpc = self.cloud.vpc().await?;
        for subnet in self.cloud.gateway_subnets(&vpc.id).await? {
            if &subnet.availability_zone == zone {
                self.cloud.untag_gateway_subnet(&subnet.id).await?;
            }
        }
        Ok(())
    }

    async fn finish_cleanup(&self) -> Result<()> {
        let vpc = self.cloud.vpc().await?;
        self.cloud.delete_gateway_group(&vpc.id).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::client::{filter_value, Instance, MockEc2Api, Tag};
    use super::super::testing::*;
    use super::*;
    use cloud_prepare_common::{ApiError, NoopReporter, RecordingReporter};
    use cloud_prepare_gateway::{DeployOutcome, GatewayLifecycleManager};
    use cloud_prepare_k8s::MockMachineSetDeployer;
    use mockall::predicate::eq;

    type Manager = GatewayLifecycleManager<AwsGatewayProvider<MockEc2Api, MockMachineSetDeployer>>;

    fn manager(ec2: MockEc2Api, machine_sets: MockMachineSetDeployer) -> Manager {
        GatewayLifecycleManager::new(
            AwsGatewayProvider::new(cloud(ec2), machine_sets),
            Arc::new(NoopReporter),
        )
    }

    fn tagged(mut subnet: Subnet) -> Subnet {
        subnet.tags.push(Tag::new(GATEWAY_LABEL, ""));
        subnet
    }

    fn three_zones() -> Vec<Subnet> {
        vec![
            subnet("subnet-a", "us-east-1a", "abc-public-us-east-1a"),
            subnet("subnet-b", "us-east-1b", "abc-public-us-east-1b"),
            subnet("subnet-c", "us-east-1c", "abc-public-us-east-1c"),
        ]
    }

    /// Dry runs pass, worker AMI and subnets resolve
    fn deployable_ec2(subnets: Vec<Subnet>) -> MockEc2Api {
        let mut ec2 = MockEc2Api::new();
        expect_vpc(&mut ec2);
        ec2.expect_dry_run()
            .returning(|_| Err(ApiError::new("DryRunOperation", "ok")));
        expect_cluster_groups(
            &mut ec2,
            group(WORKER_GROUP_ID, "abc-worker-sg"),
            Some(group(GATEWAY_GROUP_ID, "abc-submariner-gw-sg")),
        );
        ec2.expect_authorize_ingress().returning(|_, _| Ok(()));
        ec2.expect_describe_instances().returning(|filters| {
            assert_eq!(filter_value(&filters, "tag:Name"), Some("abc-worker*"));
            Ok(vec![Instance {
                id: "i-1".into(),
                image_id: Some("ami-123".into()),
                availability_zone: "us-east-1a".into(),
            }])
        });
        let by_id = subnets.clone();
        ec2.expect_describe_subnets_by_id().returning(move |ids| {
            Ok(by_id.iter().filter(|s| ids.contains(&s.id)).cloned().collect())
        });
        expect_public_subnets(&mut ec2, subnets);
        ec2
    }

    /// Story: a fresh cluster asks for two dedicated gateways; the first
    /// zone lacks the preferred instance types, so the gateways land in the
    /// next two zones and those subnets get tagged
    #[tokio::test]
    async fn story_deploys_dedicated_gateways_in_zones_with_capacity() {
        let mut ec2 = deployable_ec2(three_zones());
        ec2.expect_describe_instance_type_offerings()
            .returning(|zone, types| {
                assert_eq!(types, vec!["c5d.large".to_string(), "m5n.large".to_string()]);
                Ok(match zone {
                    "us-east-1a" => vec![],
                    "us-east-1b" => vec!["m5n.large".to_string()],
                    _ => vec!["c5d.large".to_string(), "m5n.large".to_string()],
                })
            });
        ec2.expect_create_tags()
            .withf(|id, _| id == "subnet-b" || id == "subnet-c")
            .times(2)
            .returning(|_, _| Ok(()));

        let mut machine_sets = MockMachineSetDeployer::new();
        machine_sets
            .expect_deploy()
            .withf(|ms| ms.name == "abc-submariner-gw-us-east-1b")
            .times(1)
            .returning(|ms| {
                let instance_type = &ms.manifest["spec"]["template"]["spec"]["providerSpec"]["value"]["instanceType"];
                assert_eq!(instance_type, "m5n.large");
                Ok(())
            });
        machine_sets
            .expect_deploy()
            .withf(|ms| ms.name == "abc-submariner-gw-us-east-1c")
            .times(1)
            .returning(|ms| {
                let ami = &ms.manifest["spec"]["template"]["spec"]["providerSpec"]["value"]["ami"]["id"];
                assert_eq!(ami, "ami-123");
                Ok(())
            });

        let request = GatewayDeployRequest::new(2)
            .dedicated()
            .with_public_ports([PortSpec::udp(4500), PortSpec::udp(500)]);
        let outcome = manager(ec2, machine_sets).deploy(&request).await.unwrap();
        assert!(matches!(outcome, DeployOutcome::ScaledUp { ref created } if created.len() == 2));
    }

    #[tokio::test]
    async fn test_existing_gateway_zone_is_skipped() {
        let subnets = vec![
            tagged(subnet("subnet-a", "us-east-1a", "abc-public-us-east-1a")),
            subnet("subnet-b", "us-east-1b", "abc-public-us-east-1b"),
        ];
        let mut ec2 = deployable_ec2(subnets);
        ec2.expect_describe_instance_type_offerings()
            .with(eq("us-east-1b"), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(vec!["c5d.large".to_string()]));
        ec2.expect_create_tags()
            .with(eq("subnet-b"), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));

        let mut machine_sets = MockMachineSetDeployer::new();
        machine_sets
            .expect_deploy()
            .withf(|ms| ms.name == "abc-submariner-gw-us-east-1b")
            .times(1)
            .returning(|_| Ok(()));

        let outcome = manager(ec2, machine_sets)
            .deploy(&GatewayDeployRequest::new(2).dedicated())
            .await
            .unwrap();
        assert!(matches!(outcome, DeployOutcome::ScaledUp { ref created } if created.len() == 1));
    }

    #[tokio::test]
    async fn test_no_zone_with_capacity_is_capacity_error() {
        let mut ec2 = deployable_ec2(three_zones());
        ec2.expect_describe_instance_type_offerings()
            .returning(|_, _| Ok(vec![]));

        let mut machine_sets = MockMachineSetDeployer::new();
        machine_sets.expect_deploy().never();

        let err = manager(ec2, machine_sets)
            .deploy(&GatewayDeployRequest::new(1).dedicated())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityInsufficient { ref resource, requested: 1, placed: 0 } if resource == "eligible zones"
        ));
    }

    #[tokio::test]
    async fn test_denied_probe_aborts_deploy_before_any_mutation() {
        let mut ec2 = MockEc2Api::new();
        expect_vpc(&mut ec2);
        expect_public_subnets(&mut ec2, three_zones());
        expect_cluster_groups(&mut ec2, group(WORKER_GROUP_ID, "abc-worker-sg"), None);
        ec2.expect_dry_run().returning(|call| match call {
            super::super::DryRun::CreateSecurityGroup { .. } => {
                Err(ApiError::new("UnauthorizedOperation", "denied"))
            }
            _ => Err(ApiError::new("DryRunOperation", "ok")),
        });
        ec2.expect_create_security_group().never();
        ec2.expect_authorize_ingress().never();

        let reporter = Arc::new(RecordingReporter::new());
        let manager = GatewayLifecycleManager::new(
            AwsGatewayProvider::new(cloud(ec2), MockMachineSetDeployer::new()),
            reporter.clone(),
        );
        let err = manager
            .deploy(&GatewayDeployRequest::new(1).dedicated())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { ref operation } if operation == "create security group"));
        assert_eq!(reporter.failures(), vec!["no permission to create security group"]);
    }

    #[tokio::test]
    async fn test_labeled_mode_is_unsupported() {
        let err = manager(MockEc2Api::new(), MockMachineSetDeployer::new())
            .deploy(&GatewayDeployRequest::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported { .. }));
    }

    /// Story: cleanup deletes each gateway machine set, untags its subnet,
    /// closes the internal ports and finally deletes the gateway group
    #[tokio::test]
    async fn story_cleanup_removes_gateways_then_gateway_group() {
        let subnets = vec![
            tagged(subnet("subnet-a", "us-east-1a", "abc-public-us-east-1a")),
            subnet("subnet-b", "us-east-1b", "abc-public-us-east-1b"),
        ];
        let mut ec2 = deployable_ec2(subnets);
        ec2.expect_delete_tags()
            .with(eq("subnet-a"), mockall::predicate::always())
            .times(1)
            .returning(|_, _| Ok(()));
        ec2.expect_revoke_ingress().never();
        ec2.expect_delete_security_group()
            .with(eq(GATEWAY_GROUP_ID))
            .times(1)
            .returning(|_| Ok(()));

        let mut machine_sets = MockMachineSetDeployer::new();
        machine_sets
            .expect_delete()
            .with(eq(MACHINE_API_NAMESPACE), eq("abc-submariner-gw-us-east-1a"))
            .times(1)
            .returning(|_, _| Ok(()));

        manager(ec2, machine_sets).cleanup().await.unwrap();
    }
}
