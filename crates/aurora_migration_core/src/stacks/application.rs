use crate::assembly::{App, Reference, StackId};
use crate::config::DeploymentConfig;
use crate::constructs::ec2::{Port, SecurityGroup, SecurityGroupProps, Vpc};
use crate::error::SynthError;

pub const VPC_ID: &str = "DemoVpc";
pub const DATABASE_SECURITY_GROUP: &str = "DatabaseSecurityGroup";
pub const MIGRATION_SECURITY_GROUP: &str = "DatabaseMigrationSecurityGroup";
pub const MIGRATION_INGRESS_DESCRIPTION: &str = "allow access for database migration lambda";

/// Shared network plus the two security groups every other unit builds on.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkStack {
    pub stack: StackId,
    pub vpc: Vpc,
    pub database_security_group: SecurityGroup,
    pub migration_security_group: SecurityGroup,
    pub migration_ingress_rule: Reference,
}

pub fn build_network_stack(
    app: &mut App,
    config: &DeploymentConfig,
) -> Result<NetworkStack, SynthError> {
    let stack = app.add_stack(
        &config.application_stack_name,
        config.environment.clone(),
        Some("Shared VPC and security groups for the Aurora demo".to_string()),
    )?;

    let vpc = Vpc::new(app, stack, VPC_ID, &config.vpc)?;
    let mut database_security_group = SecurityGroup::new(
        app,
        stack,
        DATABASE_SECURITY_GROUP,
        &vpc,
        SecurityGroupProps {
            group_name: Some(DATABASE_SECURITY_GROUP.to_string()),
            ..SecurityGroupProps::default()
        },
    )?;
    let migration_security_group = SecurityGroup::new(
        app,
        stack,
        MIGRATION_SECURITY_GROUP,
        &vpc,
        SecurityGroupProps {
            group_name: Some(MIGRATION_SECURITY_GROUP.to_string()),
            ..SecurityGroupProps::default()
        },
    )?;

    let migration_ingress_rule = database_security_group.add_ingress_rule(
        app,
        &migration_security_group,
        Port::tcp(config.database.port),
        MIGRATION_INGRESS_DESCRIPTION,
    )?;

    Ok(NetworkStack {
        stack,
        vpc,
        database_security_group,
        migration_security_group,
        migration_ingress_rule,
    })
}
