//! Public subnets and the gateway tag that marks the ones hosting a gateway.

use tracing::info;

use cloud_prepare_common::{Result, GATEWAY_LABEL};

use super::client::{Ec2Api, Filter, Subnet, Tag};
use super::{AwsCloud, PROVIDER};
use crate::wrap;

const INTERNAL_ELB_TAG: &str = "kubernetes.io/role/internal-elb";

fn gateway_tags() -> Vec<Tag> {
    vec![Tag::new(INTERNAL_ELB_TAG, ""), Tag::new(GATEWAY_LABEL, "")]
}

impl<C: Ec2Api> AwsCloud<C> {
    /// Public subnets of the cluster: the configured IDs, or every owned
    /// subnet named `{infraID}*-public-{region}*`
    pub(crate) async fn public_subnets(&self, vpc_id: &str) -> Result<Vec<Subnet>> {
        let ids = &self.aws.public_subnets;
        if !ids.is_empty() {
            return self
                .ec2
                .describe_subnets_by_id(ids.clone())
                .await
                .map_err(wrap(PROVIDER, "describe subnets", &ids.join(",")));
        }

        let pattern = self.naming.render("{infraID}*-public-{region}*");
        self.ec2
            .describe_subnets(vec![
                Filter::vpc(vpc_id),
                Filter::owned_by(self.naming.infra_id()),
                Filter::name_tag(&pattern),
            ])
            .await
            .map_err(wrap(PROVIDER, "describe subnets", &pattern))
    }

    /// Public subnets already tagged as gateway subnets
    pub(crate) async fn gateway_subnets(&self, vpc_id: &str) -> Result<Vec<Subnet>> {
        let subnets = self.public_subnets(vpc_id).await?;
        Ok(subnets
            .into_iter()
            .filter(|s| s.has_tag(GATEWAY_LABEL))
            .collect())
    }

    pub(crate) async fn tag_gateway_subnet(&self, subnet_id: &str) -> Result<()> {
        self.ec2
            .create_tags(subnet_id, gateway_tags())
            .await
            .map_err(wrap(PROVIDER, "tag subnet", subnet_id))?;
        info!(subnet = %subnet_id, "Tagged public subnet as gateway subnet");
        Ok(())
    }

    pub(crate) async fn untag_gateway_subnet(&self, subnet_id: &str) -> Result<()> {
        match self.ec2.delete_tags(subnet_id, gateway_tags()).await {
            Ok(()) => {
                info!(subnet = %subnet_id, "Removed gateway tags from subnet");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(wrap(PROVIDER, "untag subnet", subnet_id)(e)),
        }
    }
}
