//! The slice of the EC2 API used by the AWS adapter.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use cloud_prepare_common::ApiError;

/// Describe filter (`Name` + accepted values)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    /// Filter name, e.g. `vpc-id` or `tag:Name`
    pub name: String,
    /// Accepted values; `*` wildcards allowed where EC2 allows them
    pub values: Vec<String>,
}

impl Filter {
    /// A filter with a single value
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![value.into()],
        }
    }

    /// `tag:Name` filter
    pub fn name_tag(value: impl Into<String>) -> Self {
        Self::new("tag:Name", value)
    }

    /// `tag:{key}` filter
    pub fn tag(key: &str, value: impl Into<String>) -> Self {
        Self::new(format!("tag:{key}"), value)
    }

    /// `vpc-id` filter
    pub fn vpc(vpc_id: impl Into<String>) -> Self {
        Self::new("vpc-id", vpc_id)
    }

    /// Resources owned by the cluster: `tag:kubernetes.io/cluster/{infraID}=owned`
    pub fn owned_by(infra_id: &str) -> Self {
        Self::tag(&format!("kubernetes.io/cluster/{infra_id}"), "owned")
    }
}

/// Find the value of filter `name` in `filters`
pub fn filter_value<'a>(filters: &'a [Filter], name: &str) -> Option<&'a str> {
    filters
        .iter()
        .find(|f| f.name == name)
        .and_then(|f| f.values.first())
        .map(String::as_str)
}

/// Resource tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Key
    pub key: String,
    /// Value
    pub value: String,
}

impl Tag {
    /// Create a tag
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A VPC
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vpc {
    /// VPC ID
    pub id: String,
    /// Primary CIDR
    pub cidr_block: String,
}

/// A subnet
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Subnet {
    /// Subnet ID
    pub id: String,
    /// Availability zone
    pub availability_zone: String,
    /// Tags, including `Name`
    pub tags: Vec<Tag>,
}

impl Subnet {
    /// Value of the `Name` tag
    pub fn name(&self) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == "Name")
            .map(|t| t.value.as_str())
    }

    /// True when the subnet carries a tag with this key
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.iter().any(|t| t.key == key)
    }
}

/// Source security group of an ingress permission
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupPair {
    /// Source group ID
    pub group_id: String,
    /// Rule description
    pub description: Option<String>,
}

/// Source CIDR of an ingress permission
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpRange {
    /// Source CIDR
    pub cidr: String,
    /// Rule description
    pub description: Option<String>,
}

/// One ingress permission of a security group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IpPermission {
    /// `tcp` or `udp`
    pub protocol: String,
    /// First port
    pub from_port: u16,
    /// Last port
    pub to_port: u16,
    /// Source groups
    pub group_pairs: Vec<GroupPair>,
    /// Source CIDRs
    pub ip_ranges: Vec<IpRange>,
}

impl IpPermission {
    /// True when any source of this permission has a description containing `text`
    pub fn described_as(&self, text: &str) -> bool {
        let matches = |d: &Option<String>| d.as_deref().is_some_and(|d| d.contains(text));
        self.group_pairs.iter().any(|p| matches(&p.description))
            || self.ip_ranges.iter().any(|r| matches(&r.description))
    }
}

/// A security group
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecurityGroup {
    /// Group ID
    pub id: String,
    /// Group name
    pub name: String,
    /// Ingress permissions
    pub permissions: Vec<IpPermission>,
}

/// An EC2 instance
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Instance {
    /// Instance ID
    pub id: String,
    /// AMI the instance was launched from
    pub image_id: Option<String>,
    /// Availability zone
    pub availability_zone: String,
}

/// One side of a peering connection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeeringVpcInfo {
    /// VPC ID
    pub vpc_id: String,
    /// VPC CIDR
    pub cidr_block: String,
}

/// A VPC peering connection
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VpcPeeringConnection {
    /// Peering ID
    pub id: String,
    /// The requesting VPC
    pub requester: PeeringVpcInfo,
    /// The accepting VPC
    pub accepter: PeeringVpcInfo,
}

/// A route table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteTable {
    /// Route table ID
    pub id: String,
}

/// Calls issued with `DryRun=true` to probe permissions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRun {
    /// Create a security group in a VPC
    CreateSecurityGroup {
        /// Target VPC
        vpc_id: String,
    },
    /// Add ingress permissions
    AuthorizeIngress {
        /// Target group
        group_id: String,
    },
    /// Remove ingress permissions
    RevokeIngress {
        /// Target group
        group_id: String,
    },
    /// Delete a security group
    DeleteSecurityGroup {
        /// Target group
        group_id: String,
    },
    /// List instance type offerings
    DescribeInstanceTypeOfferings,
    /// Tag a resource
    CreateTags {
        /// Target resource
        resource_id: String,
    },
    /// Untag a resource
    DeleteTags {
        /// Target resource
        resource_id: String,
    },
}

/// EC2 operations. Implementations map SDK errors to [`ApiError`] keeping the
/// EC2 error code (`InvalidPermission.Duplicate`, `DependencyViolation`, ...).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Ec2Api: Send + Sync {
    /// VPCs matching all filters
    async fn describe_vpcs(&self, filters: Vec<Filter>) -> Result<Vec<Vpc>, ApiError>;

    /// Subnets matching all filters
    async fn describe_subnets(&self, filters: Vec<Filter>) -> Result<Vec<Subnet>, ApiError>;

    /// Subnets by ID
    async fn describe_subnets_by_id(&self, ids: Vec<String>) -> Result<Vec<Subnet>, ApiError>;

    /// Security groups matching all filters
    async fn describe_security_groups(&self, filters: Vec<Filter>) -> Result<Vec<SecurityGroup>, ApiError>;

    /// Security groups by ID
    async fn describe_security_groups_by_id(&self, ids: Vec<String>) -> Result<Vec<SecurityGroup>, ApiError>;

    /// Create a group tagged with `Name={name}`, returning its ID
    async fn create_security_group(
        &self,
        vpc_id: &str,
        name: &str,
        description: &str,
    ) -> Result<String, ApiError>;

    /// Delete a security group
    async fn delete_security_group(&self, group_id: &str) -> Result<(), ApiError>;

    /// Add ingress permissions
    async fn authorize_ingress(&self, group_id: &str, permissions: Vec<IpPermission>) -> Result<(), ApiError>;

    /// Remove ingress permissions
    async fn revoke_ingress(&self, group_id: &str, permissions: Vec<IpPermission>) -> Result<(), ApiError>;

    /// Add or overwrite tags
    async fn create_tags(&self, resource_id: &str, tags: Vec<Tag>) -> Result<(), ApiError>;

    /// Remove tags
    async fn delete_tags(&self, resource_id: &str, tags: Vec<Tag>) -> Result<(), ApiError>;

    /// Instances matching all filters
    async fn describe_instances(&self, filters: Vec<Filter>) -> Result<Vec<Instance>, ApiError>;

    /// Which of `instance_types` are offered in availability zone `zone`
    async fn describe_instance_type_offerings(
        &self,
        zone: &str,
        instance_types: Vec<String>,
    ) -> Result<Vec<String>, ApiError>;

    /// Issue a dry run. A permitted call fails with `DryRunOperation`, a
    /// forbidden one with `UnauthorizedOperation`.
    async fn dry_run(&self, call: DryRun) -> Result<(), ApiError>;

    /// Request a peering tagged with `Name={name}`
    async fn create_vpc_peering_connection(
        &self,
        vpc_id: &str,
        peer_vpc_id: &str,
        peer_region: &str,
        name: &str,
    ) -> Result<VpcPeeringConnection, ApiError>;

    /// Accept a peering on the accepter side
    async fn accept_vpc_peering_connection(&self, peering_id: &str) -> Result<(), ApiError>;

    /// Peering connections matching all filters
    async fn describe_vpc_peering_connections(
        &self,
        filters: Vec<Filter>,
    ) -> Result<Vec<VpcPeeringConnection>, ApiError>;

    /// Delete a peering connection
    async fn delete_vpc_peering_connection(&self, peering_id: &str) -> Result<(), ApiError>;

    /// Route tables matching all filters
    async fn describe_route_tables(&self, filters: Vec<Filter>) -> Result<Vec<RouteTable>, ApiError>;

    /// Route `destination_cidr` through a peering
    async fn create_route(
        &self,
        route_table_id: &str,
        destination_cidr: &str,
        peering_id: &str,
    ) -> Result<(), ApiError>;

    /// Delete a route
    async fn delete_route(&self, route_table_id: &str, destination_cidr: &str) -> Result<(), ApiError>;
}
