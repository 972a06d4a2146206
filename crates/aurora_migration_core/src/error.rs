use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("logical id '{logical_id}' is already used in stack '{stack}'")]
    DuplicateLogicalId { stack: String, logical_id: String },

    #[error("logical id '{0}' must be non-empty and alphanumeric")]
    InvalidLogicalId(String),

    #[error("stack '{0}' is already defined in this app")]
    DuplicateStack(String),

    #[error("invalid stack name '{0}': must start with a letter and contain only alphanumerics and hyphens (max 128)")]
    InvalidStackName(String),

    #[error("stack id {0} does not belong to this app")]
    UnknownStack(usize),

    #[error("stack '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("stack dependency cycle between: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("invalid CIDR '{cidr}': {reason}")]
    InvalidCidr { cidr: String, reason: String },

    #[error("invalid VPC configuration: {0}")]
    InvalidVpcConfig(String),

    #[error("security group '{group}' already admits '{peer}' on {port}")]
    DuplicateIngressRule {
        group: String,
        peer: String,
        port: String,
    },

    #[error("invalid serverless scaling: {0}")]
    InvalidScaling(String),

    #[error("invalid function configuration for '{function}': {reason}")]
    InvalidFunctionConfig { function: String, reason: String },

    #[error("property '{property}' of '{resource}' is set by the provider")]
    ReservedProperty { resource: String, property: String },

    #[error("subnet selection for '{0}' is empty")]
    EmptySubnetSelection(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to serialize template: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be configured")]
    Missing { field: &'static str },

    #[error("invalid {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

impl ConfigError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}
