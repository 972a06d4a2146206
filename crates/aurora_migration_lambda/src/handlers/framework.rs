//! Provider framework: receives CloudFormation custom resource events, runs
//! the user `onEvent` function and reports the outcome to `ResponseURL`.

use aurora_migration_core::contract::{
    CloudFormationResponse, CustomResourceEvent, CustomResourceRequestType, OnEventResponse,
    ResponseStatus, CREATE_FAILED_PHYSICAL_ID, ENV_USER_ON_EVENT_FUNCTION_ARN,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::adapters::invoke::OnEventInvoker;
use crate::adapters::response::ResponseSink;

#[derive(Debug, Error)]
pub enum FrameworkError {
    #[error("{0} must be configured")]
    MissingConfig(&'static str),

    #[error("failed to encode payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to deliver response to CloudFormation: {0}")]
    ResponseNotDelivered(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkConfig {
    pub on_event_function_arn: String,
}

impl FrameworkConfig {
    pub fn from_env() -> Result<Self, FrameworkError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FrameworkError> {
        let on_event_function_arn = lookup(ENV_USER_ON_EVENT_FUNCTION_ARN)
            .filter(|value| !value.trim().is_empty())
            .ok_or(FrameworkError::MissingConfig(ENV_USER_ON_EVENT_FUNCTION_ARN))?;
        Ok(Self {
            on_event_function_arn,
        })
    }
}

/// Error body written by the Lambda runtime when a handler fails.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandlerErrorPayload {
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

pub fn handle_framework_event(
    event: &CustomResourceEvent,
    invoker: &dyn OnEventInvoker,
    sink: &dyn ResponseSink,
    log_stream: &str,
) -> Result<CloudFormationResponse, FrameworkError> {
    let response = if is_delete_of_failed_create(event) {
        // Nothing was ever created, so there is nothing for the handler to delete.
        CloudFormationResponse::success(event, CREATE_FAILED_PHYSICAL_ID.to_string())
    } else {
        match invoke_handler(event, invoker) {
            Ok(outcome) => success_response(event, outcome).unwrap_or_else(|reason| {
                failed_response(event, &format!("{reason} (log stream {log_stream})"))
            }),
            Err(reason) => failed_response(event, &format!("{reason} (log stream {log_stream})")),
        }
    };

    let body = serde_json::to_vec(&response)?;
    sink.put_response(&event.response_url, &body)
        .map_err(FrameworkError::ResponseNotDelivered)?;

    info!(
        component = "provider_framework",
        event = "framework_responded",
        request_type = ?event.request_type,
        request_id = %event.request_id,
        status = ?response.status,
        physical_resource_id = %response.physical_resource_id,
    );
    Ok(response)
}

fn is_delete_of_failed_create(event: &CustomResourceEvent) -> bool {
    event.request_type == CustomResourceRequestType::Delete
        && event.physical_resource_id.as_deref() == Some(CREATE_FAILED_PHYSICAL_ID)
}

fn invoke_handler(
    event: &CustomResourceEvent,
    invoker: &dyn OnEventInvoker,
) -> Result<OnEventResponse, String> {
    let payload = serde_json::to_vec(event).map_err(|error| format!("failed to encode event: {error}"))?;
    info!(
        component = "provider_framework",
        event = "framework_invoked",
        request_type = ?event.request_type,
        request_id = %event.request_id,
        logical_resource_id = %event.logical_resource_id,
    );

    let outcome = invoker.invoke_on_event(&payload)?;
    if let Some(function_error) = outcome.function_error {
        let message = serde_json::from_slice::<HandlerErrorPayload>(&outcome.payload)
            .ok()
            .and_then(|body| match (body.error_type, body.error_message) {
                (_, Some(message)) if !message.is_empty() => Some(message),
                (Some(error_type), _) => Some(error_type),
                _ => None,
            })
            .unwrap_or(function_error);
        warn!(
            component = "provider_framework",
            event = "handler_failed",
            request_id = %event.request_id,
            error = %message,
        );
        return Err(message);
    }

    if outcome.payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(OnEventResponse::default());
    }
    let response: Option<OnEventResponse> = serde_json::from_slice(&outcome.payload)
        .map_err(|error| format!("onEvent returned an invalid response: {error}"))?;
    Ok(response.unwrap_or_default())
}

fn success_response(
    event: &CustomResourceEvent,
    outcome: OnEventResponse,
) -> Result<CloudFormationResponse, String> {
    let existing = event.physical_resource_id.as_deref();
    let returned = outcome
        .physical_resource_id
        .as_deref()
        .filter(|id| !id.is_empty());

    let physical_resource_id = match (event.request_type, returned) {
        (CustomResourceRequestType::Delete, Some(returned)) if Some(returned) != existing => {
            return Err(format!(
                "DELETE: cannot change the physical resource ID from \"{}\" to \"{returned}\"",
                existing.unwrap_or_default()
            ));
        }
        (_, Some(returned)) => returned.to_string(),
        (CustomResourceRequestType::Create, None) => event.request_id.clone(),
        (_, None) => existing.unwrap_or(event.request_id.as_str()).to_string(),
    };

    let mut response = CloudFormationResponse::success(event, physical_resource_id);
    response.data = outcome.data;
    response.no_echo = outcome.no_echo.unwrap_or(false);
    Ok(response)
}

fn failed_response(event: &CustomResourceEvent, reason: &str) -> CloudFormationResponse {
    let physical_resource_id = match (event.request_type, event.physical_resource_id.as_deref()) {
        (CustomResourceRequestType::Create, _) | (_, None) => CREATE_FAILED_PHYSICAL_ID.to_string(),
        (_, Some(existing)) => existing.to_string(),
    };
    CloudFormationResponse::failed(event, physical_resource_id, reason)
}

/// True when CloudFormation will treat the response as a failure.
pub fn is_failure(response: &CloudFormationResponse) -> bool {
    response.status == ResponseStatus::Failed
}
