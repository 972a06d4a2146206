use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::assembly::{App, Reference, StackId};
use crate::config::DeploymentConfig;
use crate::constructs::custom_resources::{CustomResource, Provider};
use crate::constructs::ec2::SubnetType;
use crate::constructs::iam::{
    ManagedPolicy, PolicyDocument, PolicyStatement, Role, RoleProps, ServicePrincipal,
};
use crate::constructs::lambda::{Function, FunctionProps, Runtime, VpcPlacement, BOOTSTRAP_HANDLER};
use crate::contract::{ENV_DATABASE_SECRET_NAME, ENV_REGION};
use crate::error::SynthError;
use crate::stacks::application::NetworkStack;
use crate::stacks::database::DatabaseStack;
use crate::template::concat;

pub const FUNCTION_ROLE_ID: &str = "DatabaseMigrationFunctionRole";
pub const INLINE_POLICY_NAME: &str = "customSSMAccessPolicy";
pub const FUNCTION_ID: &str = "DatabaseMigrationFunction";
pub const PROVIDER_ID: &str = "DatabaseMigrationResourceProvider";
pub const RESOURCE_ID: &str = "DatabaseMigrationResource";
pub const TIMESTAMP_PROPERTY: &str = "date";

const SECRET_ACCESS_ACTIONS: [&str; 4] = [
    "secretsmanager:GetResourcePolicy",
    "secretsmanager:GetSecretValue",
    "secretsmanager:DescribeSecret",
    "secretsmanager:ListSecretVersionIds",
];

const NETWORK_INTERFACE_ACTIONS: [&str; 5] = [
    "ec2:DescribeNetworkInterfaces",
    "ec2:CreateNetworkInterface",
    "ec2:DeleteNetworkInterface",
    "ec2:DescribeInstances",
    "ec2:AttachNetworkInterface",
];

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationStack {
    pub stack: StackId,
    pub role: Role,
    pub function: Function,
    pub provider: Provider,
    pub trigger: Reference,
}

/// RFC 1123 rendering of the synthesis time. A new value on every synth makes
/// CloudFormation send an Update to the provider on every deployment.
pub fn migration_trigger_timestamp(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn build_migration_stack(
    app: &mut App,
    config: &DeploymentConfig,
    network: &NetworkStack,
    database: &DatabaseStack,
) -> Result<MigrationStack, SynthError> {
    let stack = app.add_stack(
        &config.migration_stack_name(),
        config.environment.clone(),
        Some("Runs the schema migrations against the Aurora cluster on every deployment".to_string()),
    )?;

    let secret_name = database.secret().secret_name().to_string();
    let secret_arn_pattern = concat(vec![
        Value::from("arn:aws:secretsmanager:"),
        database.environment.region_value(),
        Value::from(":"),
        database.environment.account_value(),
        Value::from(format!(":secret:{secret_name}*")),
    ]);
    let access_policy = PolicyDocument::new(vec![
        PolicyStatement::allow()
            .add_actions(&SECRET_ACCESS_ACTIONS)
            .add_resource(secret_arn_pattern),
        PolicyStatement::allow()
            .add_actions(&NETWORK_INTERFACE_ACTIONS)
            .add_resource("*"),
    ]);

    let mut role = Role::new(
        app,
        stack,
        FUNCTION_ROLE_ID,
        RoleProps {
            assumed_by: ServicePrincipal::lambda(),
            inline_policies: BTreeMap::from([(INLINE_POLICY_NAME.to_string(), access_policy)]),
            managed_policies: vec![ManagedPolicy::lambda_basic_execution()],
        },
    )?;
    // Granted before the function exists so it depends on the default policy.
    database.secret().grant_read(app, &mut role)?;

    let placement = VpcPlacement {
        subnets: network.vpc.select_subnets(SubnetType::PrivateWithEgress),
        security_groups: vec![network.migration_security_group.group_id()],
    };
    let environment = BTreeMap::from([
        (ENV_DATABASE_SECRET_NAME.to_string(), Value::from(secret_name)),
        (ENV_REGION.to_string(), database.environment.region_value()),
    ]);
    let function = Function::new(
        app,
        stack,
        FUNCTION_ID,
        FunctionProps {
            runtime: Runtime::ProvidedAl2023,
            handler: BOOTSTRAP_HANDLER.to_string(),
            asset: &config.migration_handler_asset,
            description: Some("Applies database schema migrations".to_string()),
            environment,
            vpc: Some(placement),
            timeout: config.migration_function.timeout,
            memory_size_mb: config.migration_function.memory_size_mb,
            role: &role,
        },
    )?;

    let provider = Provider::new(
        app,
        stack,
        PROVIDER_ID,
        &function,
        &config.provider_framework_asset,
    )?;

    let mut properties = Map::new();
    properties.insert(
        TIMESTAMP_PROPERTY.to_string(),
        Value::from(migration_trigger_timestamp(config.synthesized_at)),
    );
    let trigger = CustomResource::new(app, stack, RESOURCE_ID, &provider.service_token(), properties)?;

    Ok(MigrationStack {
        stack,
        role,
        function,
        provider,
        trigger,
    })
}
