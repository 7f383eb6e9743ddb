//! VPC peering between two AWS clusters.
//!
//! The source cluster requests the peering, the target accepts it, and each
//! side gets a route to the other side's CIDR through the peering on its main
//! route table. Accepting and routing race the peering's propagation, so both
//! run under the peering retry policy.

use tracing::{debug, info};

use cloud_prepare_common::{retry_with_backoff, Error, Reporter, Result};

use super::client::{Ec2Api, Filter, VpcPeeringConnection};
use super::validations::cidrs_overlap;
use super::{AwsCloud, PROVIDER};
use crate::wrap;

impl<C: Ec2Api> AwsCloud<C> {
    fn peering_name<T>(&self, target: &AwsCloud<T>) -> String {
        format!("{}-{}", self.naming.infra_id(), target.naming.infra_id())
    }

    async fn main_route_table(&self, vpc_id: &str) -> Result<String> {
        let tables = self
            .ec2
            .describe_route_tables(vec![
                Filter::vpc(vpc_id),
                Filter::new("association.main", "true"),
            ])
            .await
            .map_err(wrap(PROVIDER, "describe route tables", vpc_id))?;
        tables
            .into_iter()
            .next()
            .map(|t| t.id)
            .ok_or_else(|| Error::not_found("main route table", vpc_id))
    }

    async fn create_route(&self, vpc_id: &str, destination: &str, peering_id: &str) -> Result<()> {
        let table = self.main_route_table(vpc_id).await?;
        match self.ec2.create_route(&table, destination, peering_id).await {
            Ok(()) => {
                info!(route_table = %table, destination, "Created peering route");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(route_table = %table, destination, "Peering route already exists");
                Ok(())
            }
            Err(e) => Err(wrap(PROVIDER, "create route", &table)(e)),
        }
    }

    async fn accept_peering(&self, peering_id: &str) -> Result<()> {
        match self.ec2.accept_vpc_peering_connection(peering_id).await {
            Ok(()) => Ok(()),
            // already active
            Err(e) if e.is_code("InvalidStateTransition") => Ok(()),
            Err(e) => Err(wrap(PROVIDER, "accept vpc peering", peering_id)(e)),
        }
    }

    async fn delete_route(&self, vpc_id: &str, destination: &str) -> Result<()> {
        let table = self.main_route_table(vpc_id).await?;
        match self.ec2.delete_route(&table, destination).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(wrap(PROVIDER, "delete route", &table)(e)),
        }
    }

    /// Peer this cluster's VPC with `target`'s, returning the peering ID.
    ///
    /// An existing peering between the two VPCs is reused and routes that
    /// already exist are kept, so a failed call can be repeated. Fails with a
    /// validation error when the two VPC CIDRs overlap.
    pub async fn create_vpc_peering<T: Ec2Api>(
        &self,
        target: &AwsCloud<T>,
        reporter: &dyn Reporter,
    ) -> Result<String> {
        reporter.started(&format!(
            "Creating VPC peering between {}/{} and {}/{}",
            self.naming.infra_id(),
            self.naming.region(),
            target.naming.infra_id(),
            target.naming.region()
        ));

        let source_vpc = self.vpc().await.map_err(|e| reporter.error(e))?;
        let target_vpc = target.vpc().await.map_err(|e| reporter.error(e))?;
        if cidrs_overlap(&source_vpc.cidr_block, &target_vpc.cidr_block)
            .map_err(|e| reporter.error(e))?
        {
            return Err(reporter.error(Error::validation(format!(
                "source [{}] and target [{}] CIDR blocks must be different",
                source_vpc.cidr_block, target_vpc.cidr_block
            ))));
        }

        let name = self.peering_name(target);
        let peering = match self.find_peering(&source_vpc.id, &target_vpc.id, target).await {
            Ok(existing) => {
                info!(peering = %existing.id, "Reusing existing VPC peering");
                existing
            }
            Err(e) if e.is_not_found() => {
                let requested = self
                    .ec2
                    .create_vpc_peering_connection(
                        &source_vpc.id,
                        &target_vpc.id,
                        target.naming.region(),
                        &name,
                    )
                    .await
                    .map_err(wrap(PROVIDER, "request vpc peering", &name))
                    .map_err(|e| reporter.error(e))?;
                info!(peering = %requested.id, "Requested VPC peering");
                requested
            }
            Err(e) => return Err(reporter.error(e)),
        };

        let peering_id = peering.id.as_str();
        retry_with_backoff(&self.retry.peering, "accept_vpc_peering", || async move {
            target.accept_peering(peering_id).await
        })
        .await
        .map_err(|e| reporter.error(e))?;

        let peering = &peering;
        let (source_vpc, target_vpc) = (&source_vpc, &target_vpc);
        retry_with_backoff(&self.retry.peering, "create_peering_routes", || async move {
            self.create_route(&source_vpc.id, &peering.accepter.cidr_block, &peering.id)
                .await?;
            target
                .create_route(&target_vpc.id, &peering.requester.cidr_block, &peering.id)
                .await
        })
        .await
        .map_err(|e| reporter.error(e))?;

        reporter.succeeded(&format!("Created VPC peering {}", peering.id));
        Ok(peering.id.clone())
    }

    async fn find_peering<T>(
        &self,
        source_vpc: &str,
        target_vpc: &str,
        target: &AwsCloud<T>,
    ) -> Result<VpcPeeringConnection> {
        let name = self.peering_name(target);
        let mut connections = self
            .ec2
            .describe_vpc_peering_connections(vec![
                Filter::new("requester-vpc-info.vpc-id", source_vpc),
                Filter::new("accepter-vpc-info.vpc-id", target_vpc),
                Filter::name_tag(&name),
            ])
            .await
            .map_err(wrap(PROVIDER, "describe vpc peering connections", &name))?;
        match connections.len() {
            1 => Ok(connections.remove(0)),
            0 => Err(Error::not_found("vpc peering connection", name)),
            n => Err(Error::validation(format!(
                "expected exactly 1 vpc peering connection named {name:?}, got {n}"
            ))),
        }
    }

    /// Remove the routes and the peering created by [`Self::create_vpc_peering`]
    pub async fn cleanup_vpc_peering<T: Ec2Api>(
        &self,
        target: &AwsCloud<T>,
        reporter: &dyn Reporter,
    ) -> Result<()> {
        reporter.started(&format!(
            "Removing VPC peering between {}/{} and {}/{}",
            self.naming.infra_id(),
            self.naming.region(),
            target.naming.infra_id(),
            target.naming.region()
        ));

        let source_vpc = self.vpc().await.map_err(|e| reporter.error(e))?;
        let target_vpc = target.vpc().await.map_err(|e| reporter.error(e))?;
        let peering = self
            .find_peering(&source_vpc.id, &target_vpc.id, target)
            .await
            .map_err(|e| reporter.error(e))?;

        self.delete_route(&source_vpc.id, &peering.accepter.cidr_block)
            .await
            .map_err(|e| reporter.error(e))?;
        target
            .delete_route(&target_vpc.id, &peering.requester.cidr_block)
            .await
            .map_err(|e| reporter.error(e))?;

        self.ec2
            .delete_vpc_peering_connection(&peering.id)
            .await
            .map_err(wrap(PROVIDER, "delete vpc peering", &peering.id))
            .map_err(|e| reporter.error(e))?;

        reporter.succeeded(&format!("Removed VPC peering {}", peering.id));
        Ok(())
    }
}
