use aurora_migration_core::contract::{CloudFormationResponse, CustomResourceEvent};
use aurora_migration_lambda::adapters::invoke::{InvokeOutcome, OnEventInvoker};
use aurora_migration_lambda::adapters::response::ResponseSink;
use aurora_migration_lambda::handlers::framework::{
    handle_framework_event, is_failure, FrameworkConfig,
};
use aurora_migration_lambda::logging::init_logging;
use aws_sdk_lambda::types::InvocationType;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use reqwest::header::CONTENT_TYPE;

struct AwsLambdaOnEventInvoker {
    lambda_client: aws_sdk_lambda::Client,
    function_arn: String,
}

impl OnEventInvoker for AwsLambdaOnEventInvoker {
    fn invoke_on_event(&self, payload: &[u8]) -> Result<InvokeOutcome, String> {
        let request_payload = payload.to_vec();
        let client = self.lambda_client.clone();
        let function_name = self.function_arn.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = client
                    .invoke()
                    .function_name(function_name)
                    .invocation_type(InvocationType::RequestResponse)
                    .set_payload(Some(request_payload.into()))
                    .send()
                    .await
                    .map_err(|error| format!("failed to invoke onEvent handler: {error}"))?;
                Ok(InvokeOutcome {
                    payload: output
                        .payload()
                        .map(|blob| blob.as_ref().to_vec())
                        .unwrap_or_default(),
                    function_error: output.function_error().map(str::to_string),
                })
            })
        })
    }
}

struct PresignedUrlSink {
    http_client: reqwest::Client,
}

impl ResponseSink for PresignedUrlSink {
    fn put_response(&self, response_url: &str, body: &[u8]) -> Result<(), String> {
        let client = self.http_client.clone();
        let url = response_url.to_string();
        let body = body.to_vec();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                // The pre-signed URL is signed without a content type.
                client
                    .put(url)
                    .header(CONTENT_TYPE, "")
                    .body(body)
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map(|_| ())
                    .map_err(|error| format!("response PUT failed: {}", error.without_url()))
            })
        })
    }
}

fn handle_request(
    event: LambdaEvent<CustomResourceEvent>,
    invoker: &dyn OnEventInvoker,
    sink: &dyn ResponseSink,
) -> Result<CloudFormationResponse, Error> {
    let log_stream = std::env::var("AWS_LAMBDA_LOG_STREAM_NAME").unwrap_or_default();
    let response = handle_framework_event(&event.payload, invoker, sink, &log_stream)?;
    if is_failure(&response) {
        tracing::warn!(
            component = "provider_framework",
            request_id = %response.request_id,
            reason = response.reason.as_deref().unwrap_or_default(),
            "reported FAILED to CloudFormation"
        );
    }
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();

    let config = FrameworkConfig::from_env()?;
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let invoker = AwsLambdaOnEventInvoker {
        lambda_client: aws_sdk_lambda::Client::new(&aws_config),
        function_arn: config.on_event_function_arn,
    };
    let sink = PresignedUrlSink {
        http_client: reqwest::Client::new(),
    };

    let invoker = &invoker;
    let sink = &sink;
    lambda_runtime::run(service_fn(move |event| async move {
        handle_request(event, invoker, sink)
    }))
    .await
}
