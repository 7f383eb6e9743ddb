//! Dry-run permission probes and peering prerequisites.

use ipnet::IpNet;
use tracing::debug;

use cloud_prepare_common::{ApiError, Error, Result};

use super::client::{DryRun, Ec2Api};
use super::{AwsCloud, PROVIDER};

/// Interpret the result of a dry run: `DryRunOperation` means permitted
fn permission_result(result: std::result::Result<(), ApiError>, operation: &str) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_code("DryRunOperation") => Ok(()),
        Err(e) if e.is_code("UnauthorizedOperation") => Err(Error::permission_denied(operation)),
        Err(e) => Err(Error::provider(
            PROVIDER,
            format!("check permissions to {operation}"),
            "",
            e,
        )),
    }
}

/// True when the two CIDR blocks share any address
pub fn cidrs_overlap(a: &str, b: &str) -> Result<bool> {
    let parse = |cidr: &str| {
        cidr.parse::<IpNet>()
            .map_err(|e| Error::validation(format!("invalid CIDR block {cidr:?}: {e}")))
    };
    let (a, b) = (parse(a)?, parse(b)?);
    Ok(a.contains(&b.network()) || b.contains(&a.network()))
}

impl<C: Ec2Api> AwsCloud<C> {
    async fn probe(&self, call: DryRun, operation: &str) -> Result<()> {
        debug!(operation, "Checking permission");
        permission_result(self.ec2.dry_run(call).await, operation)
    }

    pub(crate) async fn validate_create_group(&self, vpc_id: &str) -> Result<()> {
        self.probe(
            DryRun::CreateSecurityGroup {
                vpc_id: vpc_id.to_string(),
            },
            "create security group",
        )
        .await
    }

    pub(crate) async fn validate_authorize(&self, group_id: &str) -> Result<()> {
        self.probe(
            DryRun::AuthorizeIngress {
                group_id: group_id.to_string(),
            },
            "authorize security group ingress",
        )
        .await
    }

    pub(crate) async fn validate_revoke(&self, group_id: &str) -> Result<()> {
        self.probe(
            DryRun::RevokeIngress {
                group_id: group_id.to_string(),
            },
            "revoke security group ingress",
        )
        .await
    }

    pub(crate) async fn validate_delete_group(&self, group_id: &str) -> Result<()> {
        self.probe(
            DryRun::DeleteSecurityGroup {
                group_id: group_id.to_string(),
            },
            "delete security group",
        )
        .await
    }

    pub(crate) async fn validate_describe_offerings(&self) -> Result<()> {
        self.probe(
            DryRun::DescribeInstanceTypeOfferings,
            "describe instance type offerings",
        )
        .await
    }

    pub(crate) async fn validate_create_tags(&self, subnet_id: &str) -> Result<()> {
        self.probe(
            DryRun::CreateTags {
                resource_id: subnet_id.to_string(),
            },
            "create tags on subnets",
        )
        .await
    }

    pub(crate) async fn validate_delete_tags(&self, subnet_id: &str) -> Result<()> {
        self.probe(
            DryRun::DeleteTags {
                resource_id: subnet_id.to_string(),
            },
            "delete tags from subnets",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::same("10.0.0.0/16", "10.0.0.0/16", true)]
    #[case::nested("10.0.0.0/16", "10.0.128.0/24", true)]
    #[case::nested_reversed("10.0.128.0/24", "10.0.0.0/16", true)]
    #[case::disjoint("10.0.0.0/16", "10.1.0.0/16", false)]
    #[case::adjacent("10.0.0.0/17", "10.0.128.0/17", false)]
    fn test_cidr_overlap(#[case] a: &str, #[case] b: &str, #[case] overlap: bool) {
        assert_eq!(cidrs_overlap(a, b).unwrap(), overlap);
    }

    #[test]
    fn test_invalid_cidr_is_validation_error() {
        let err = cidrs_overlap("10.0.0.0/16", "not-a-cidr").unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[rstest]
    #[case::dry_run_passed(Err(ApiError::new("DryRunOperation", "ok")), None)]
    #[case::plain_success(Ok(()), None)]
    #[case::unauthorized(
        Err(ApiError::new("UnauthorizedOperation", "denied")),
        Some("no permission to create security group")
    )]
    fn test_permission_result(
        #[case] result: std::result::Result<(), ApiError>,
        #[case] expected_error: Option<&str>,
    ) {
        let outcome = permission_result(result, "create security group");
        assert_eq!(outcome.err().map(|e| e.to_string()).as_deref(), expected_error);
    }

    #[test]
    fn test_other_probe_failures_keep_the_provider_error() {
        let err = permission_result(
            Err(ApiError::new("RequestLimitExceeded", "slow down")),
            "create security group",
        )
        .unwrap_err();
        assert_eq!(err.provider_name(), Some("aws"));
        assert!(err.is_retryable());
    }
}
