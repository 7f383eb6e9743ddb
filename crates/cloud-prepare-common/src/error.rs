//! Error types for cloud-prepare
//!
//! Errors carry enough context (provider, operation, resource) to be
//! actionable by an operator. Raw failures from cloud collaborators arrive as
//! [`ApiError`] and are wrapped into [`Error::Provider`] at the adapter
//! boundary.

use std::fmt;

use thiserror::Error;

/// A failure reported by a cloud API collaborator.
///
/// `code` is the provider's machine-readable error code (e.g. AWS
/// `DependencyViolation`, GCP `notFound`), `status` the HTTP status when the
/// collaborator exposes one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    /// Provider error code
    pub code: String,
    /// Human-readable message from the provider
    pub message: String,
    /// HTTP status code, if known
    pub status: Option<u16>,
}

impl ApiError {
    /// Create an API error from a code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Attach an HTTP status code
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Shorthand for a 404 with the given resource description
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NotFound", message).with_status(404)
    }

    /// True when the error code equals `code`
    pub fn is_code(&self, code: &str) -> bool {
        self.code == code
    }

    /// True when the provider reports the resource as absent.
    ///
    /// AWS uses dotted codes like `InvalidGroup.NotFound`, GCP and Azure use
    /// HTTP 404.
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
            || self.code.ends_with("NotFound")
            || self.code.eq_ignore_ascii_case("notFound")
    }

    /// True for duplicate-create errors (the resource already exists)
    pub fn is_already_exists(&self) -> bool {
        self.status == Some(409)
            || self.code.ends_with(".Duplicate")
            || self.code.ends_with("AlreadyExists")
            || self.code.eq_ignore_ascii_case("alreadyExists")
    }

    /// True for errors that are expected to clear up on their own
    pub fn is_transient(&self) -> bool {
        const TRANSIENT_CODES: &[&str] = &[
            "DependencyViolation",
            "InvalidVpcPeeringConnectionID.NotFound",
            "RequestLimitExceeded",
            "Throttling",
            "ServiceUnavailable",
        ];
        TRANSIENT_CODES.contains(&self.code.as_str())
            || matches!(self.status, Some(429) | Some(500..=599))
    }
}

/// Main error type for cloud-prepare operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A required resource does not exist
    #[error("{kind} {name:?} not found")]
    NotFound {
        /// Resource kind (vpc, network, security group, ...)
        kind: String,
        /// Name or identifier that was looked up
        name: String,
    },

    /// A dry-run permission probe was rejected
    #[error("no permission to {operation}")]
    PermissionDenied {
        /// The operation that is not permitted
        operation: String,
    },

    /// Not enough eligible zones or nodes for the requested gateways
    #[error("not enough {resource} for gateways: requested {requested}, only {placed} could be placed")]
    CapacityInsufficient {
        /// What ran out (zones, worker nodes, ...)
        resource: String,
        /// Gateways that were needed by this call
        requested: usize,
        /// Gateways that were actually created by this call
        placed: usize,
    },

    /// The provider cannot perform the requested operation
    #[error("unsupported: {message}")]
    Unsupported {
        /// Description of the unsupported request
        message: String,
    },

    /// A cloud API call failed
    #[error("{provider}: failed to {operation} {resource:?}: {source}")]
    Provider {
        /// Provider name (aws, gcp, azure, rhos, generic)
        provider: String,
        /// Operation that failed (e.g. "create security group")
        operation: String,
        /// Name or identifier of the resource involved
        resource: String,
        /// The error returned by the collaborator
        #[source]
        source: ApiError,
    },

    /// Invalid input
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field, if known
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Template rendering error
    #[error("template error [{template}]: {message}")]
    Template {
        /// Template name
        template: String,
        /// Description of what failed
        message: String,
    },

    /// Configuration loading error
    #[error("configuration error: {message}")]
    Config {
        /// Description of what failed
        message: String,
    },

    /// One or more cleanup steps failed; every step was still attempted
    #[error("cleanup failed: {}", CleanupFailures(.failures))]
    Cleanup {
        /// Failures in the order they happened
        failures: Vec<Error>,
    },
}

struct CleanupFailures<'a>(&'a [Error]);

impl fmt::Display for CleanupFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl Error {
    /// Create a not-found error for a resource kind and name
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a permission error for a denied operation
    pub fn permission_denied(operation: impl Into<String>) -> Self {
        Self::PermissionDenied {
            operation: operation.into(),
        }
    }

    /// Create a capacity error
    pub fn capacity(resource: impl Into<String>, requested: usize, placed: usize) -> Self {
        Self::CapacityInsufficient {
            resource: resource.into(),
            requested,
            placed,
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    /// Wrap a collaborator error with provider, operation and resource context
    pub fn provider(
        provider: impl Into<String>,
        operation: impl Into<String>,
        resource: impl Into<String>,
        source: ApiError,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            operation: operation.into(),
            resource: resource.into(),
            source,
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a template rendering error
    pub fn template(template: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Collapse cleanup failures: `Ok` when empty, otherwise [`Error::Cleanup`]
    pub fn from_cleanup_failures(failures: Vec<Error>) -> Result<(), Self> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self::Cleanup { failures })
        }
    }

    /// The collaborator error behind a provider failure, if any
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Error::Provider { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Provider name if this error came from a cloud adapter
    pub fn provider_name(&self) -> Option<&str> {
        match self {
            Error::Provider { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// True when the error means "the resource is already gone"
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Provider { source, .. } => source.is_not_found(),
            Error::Kube { source } => matches!(source, kube::Error::Api(ae) if ae.code == 404),
            _ => false,
        }
    }

    /// True for Kubernetes optimistic-concurrency conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// Check if this error is retryable
    ///
    /// Input, permission and capacity errors need operator action and are not
    /// retryable. Provider errors are retryable only for known-transient codes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Provider { source, .. } => source.is_transient(),
            Error::NotFound { .. }
            | Error::PermissionDenied { .. }
            | Error::CapacityInsufficient { .. }
            | Error::Unsupported { .. }
            | Error::Validation { .. }
            | Error::Serialization { .. }
            | Error::Template { .. }
            | Error::Config { .. }
            | Error::Cleanup { .. } => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
