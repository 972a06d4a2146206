//! Wire contract between CloudFormation, the provider framework and the
//! migration `onEvent` handler.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ENV_DATABASE_SECRET_NAME: &str = "DATABASE_SECRET_NAME";
pub const ENV_REGION: &str = "REGION";
pub const ENV_USER_ON_EVENT_FUNCTION_ARN: &str = "USER_ON_EVENT_FUNCTION_ARN";

/// Physical id reported when a create fails, so the follow-up delete issued by
/// the rollback can be acknowledged without calling the handler.
pub const CREATE_FAILED_PHYSICAL_ID: &str = "AWSCDK::CustomResourceProviderFramework::CREATE_FAILED";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CustomResourceRequestType {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CustomResourceEvent {
    pub request_type: CustomResourceRequestType,
    #[serde(default)]
    pub service_token: String,
    #[serde(rename = "ResponseURL")]
    pub response_url: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    pub resource_type: String,
    #[serde(default)]
    pub resource_properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct OnEventResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_echo: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CloudFormationResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default)]
    pub no_echo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl CloudFormationResponse {
    pub fn success(event: &CustomResourceEvent, physical_resource_id: String) -> Self {
        Self {
            status: ResponseStatus::Success,
            reason: None,
            physical_resource_id,
            stack_id: event.stack_id.clone(),
            request_id: event.request_id.clone(),
            logical_resource_id: event.logical_resource_id.clone(),
            no_echo: false,
            data: None,
        }
    }

    pub fn failed(
        event: &CustomResourceEvent,
        physical_resource_id: String,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: ResponseStatus::Failed,
            reason: Some(reason.into()),
            ..Self::success(event, physical_resource_id)
        }
    }
}

/// Secret value maintained by the secret/cluster target attachment.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSecretValue {
    #[serde(default)]
    pub db_cluster_identifier: Option<String>,
    pub password: String,
    pub dbname: String,
    pub engine: String,
    pub port: u16,
    pub host: String,
    pub username: String,
}

impl std::fmt::Debug for DatabaseSecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseSecretValue")
            .field("db_cluster_identifier", &self.db_cluster_identifier)
            .field("password", &"<redacted>")
            .field("dbname", &self.dbname)
            .field("engine", &self.engine)
            .field("port", &self.port)
            .field("host", &self.host)
            .field("username", &self.username)
            .finish()
    }
}
