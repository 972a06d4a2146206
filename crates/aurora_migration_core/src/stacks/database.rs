use crate::assembly::{App, Environment, StackId};
use crate::config::DeploymentConfig;
use crate::constructs::ec2::SubnetType;
use crate::constructs::rds::{ServerlessCluster, ServerlessClusterProps, ServerlessScaling, SubnetGroup};
use crate::constructs::secretsmanager::{Credentials, DatabaseSecret};
use crate::error::SynthError;
use crate::stacks::application::NetworkStack;

pub const SUBNET_GROUP_ID: &str = "DatabaseSubnetGroup";
pub const SUBNET_GROUP_DESCRIPTION: &str = "SubnetGroup for Aurora Serverless";
pub const CLUSTER_ID: &str = "DemoCluster";

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseStack {
    pub stack: StackId,
    pub environment: Environment,
    pub credentials: Credentials,
    pub subnet_group: SubnetGroup,
    pub cluster: ServerlessCluster,
}

impl DatabaseStack {
    pub fn secret(&self) -> &DatabaseSecret {
        self.cluster.secret()
    }
}

pub fn build_database_stack(
    app: &mut App,
    config: &DeploymentConfig,
    network: &NetworkStack,
) -> Result<DatabaseStack, SynthError> {
    let settings = &config.database;
    let stack = app.add_stack(
        &config.database_stack_name(),
        config.environment.clone(),
        Some("Aurora Serverless PostgreSQL cluster and its generated credentials".to_string()),
    )?;

    let credentials =
        Credentials::from_generated_secret(settings.username.as_str(), settings.secret_name.as_str());
    let subnet_group = SubnetGroup::new(
        app,
        stack,
        SUBNET_GROUP_ID,
        SUBNET_GROUP_DESCRIPTION,
        &network.vpc.select_subnets(SubnetType::PrivateWithEgress),
    )?;

    let cluster = ServerlessCluster::new(
        app,
        stack,
        CLUSTER_ID,
        ServerlessClusterProps {
            engine_version: settings.engine_version,
            credentials: &credentials,
            enable_data_api: settings.enable_data_api,
            default_database_name: Some(settings.default_database_name.clone()),
            subnet_group: &subnet_group,
            security_groups: vec![network.database_security_group.group_id()],
            scaling: ServerlessScaling {
                min_capacity: settings.min_capacity,
                max_capacity: settings.max_capacity,
                auto_pause: settings.auto_pause,
            },
        },
    )?;

    Ok(DatabaseStack {
        stack,
        environment: config.environment.clone(),
        credentials,
        subnet_group,
        cluster,
    })
}
