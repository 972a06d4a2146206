//! Provider framework and custom resources.
//!
//! CloudFormation calls the framework function, which calls the user
//! `onEvent` handler and reports the outcome back to the pre-signed response
//! URL. The handler therefore never deals with CloudFormation responses.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::assembly::{App, Reference, StackId};
use crate::constructs::iam::{ManagedPolicy, PolicyStatement, Role, RoleProps, ServicePrincipal};
use crate::constructs::lambda::{Function, FunctionProps, LambdaAsset, Runtime, BOOTSTRAP_HANDLER};
use crate::contract::ENV_USER_ON_EVENT_FUNCTION_ARN;
use crate::error::SynthError;
use crate::template::{join, logical_id, RemovalPolicy, Resource};

pub const CUSTOM_RESOURCE_TYPE: &str = "AWS::CloudFormation::CustomResource";
const SERVICE_TOKEN: &str = "ServiceToken";
const FRAMEWORK_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const FRAMEWORK_MEMORY_MB: u32 = 128;

#[derive(Debug, Clone, PartialEq)]
pub struct Provider {
    framework: Function,
    framework_role: Role,
}

impl Provider {
    pub fn new(
        app: &mut App,
        stack: StackId,
        id: &str,
        on_event_handler: &Function,
        framework_asset: &LambdaAsset,
    ) -> Result<Self, SynthError> {
        let stack_name = app.stack(stack)?.name().to_string();
        let handler_arn = app.resolve(stack, &on_event_handler.arn())?;

        let mut framework_role = Role::new(
            app,
            stack,
            &logical_id(&[id, "frameworkonEventServiceRole"]),
            RoleProps {
                assumed_by: ServicePrincipal::lambda(),
                inline_policies: BTreeMap::new(),
                managed_policies: vec![ManagedPolicy::lambda_basic_execution()],
            },
        )?;
        framework_role.add_to_policy(
            app,
            PolicyStatement::allow()
                .add_actions(&["lambda:InvokeFunction"])
                .add_resource(handler_arn.clone())
                .add_resource(join("", vec![handler_arn.clone(), Value::from(":*")])),
        )?;

        let framework = Function::new(
            app,
            stack,
            &logical_id(&[id, "frameworkonEvent"]),
            FunctionProps {
                runtime: Runtime::ProvidedAl2023,
                handler: BOOTSTRAP_HANDLER.to_string(),
                asset: framework_asset,
                description: Some(format!(
                    "Custom resource provider framework - onEvent ({stack_name}/{id})"
                )),
                environment: BTreeMap::from([(
                    ENV_USER_ON_EVENT_FUNCTION_ARN.to_string(),
                    handler_arn,
                )]),
                vpc: None,
                timeout: FRAMEWORK_TIMEOUT,
                memory_size_mb: FRAMEWORK_MEMORY_MB,
                role: &framework_role,
            },
        )?;

        Ok(Self {
            framework,
            framework_role,
        })
    }

    pub fn framework_function(&self) -> &Function {
        &self.framework
    }

    pub fn framework_role(&self) -> &Role {
        &self.framework_role
    }

    pub fn service_token(&self) -> Reference {
        self.framework.arn()
    }
}

pub struct CustomResource;

impl CustomResource {
    /// Declares a custom resource. CloudFormation only calls the provider
    /// again when one of `properties` changes.
    pub fn new(
        app: &mut App,
        stack: StackId,
        id: &str,
        service_token: &Reference,
        properties: Map<String, Value>,
    ) -> Result<Reference, SynthError> {
        if properties.contains_key(SERVICE_TOKEN) {
            return Err(SynthError::ReservedProperty {
                resource: id.to_string(),
                property: SERVICE_TOKEN.to_string(),
            });
        }
        let token = app.resolve(stack, service_token)?;
        let mut resource = Resource::new(CUSTOM_RESOURCE_TYPE)
            .property(SERVICE_TOKEN, token)
            .removal_policy(RemovalPolicy::Delete);
        for (key, value) in properties {
            resource = resource.property(&key, value);
        }
        app.add_resource(stack, id, resource)
    }
}
