//! The three deployment units and their composition into one app.

pub mod application;
pub mod database;
pub mod migration;

use crate::assembly::App;
use crate::config::DeploymentConfig;
use crate::error::SynthError;
use crate::synth::CloudAssembly;

pub use application::{build_network_stack, NetworkStack};
pub use database::{build_database_stack, DatabaseStack};
pub use migration::{build_migration_stack, migration_trigger_timestamp, MigrationStack};

#[derive(Debug, Clone)]
pub struct Application {
    pub app: App,
    pub network: NetworkStack,
    pub database: DatabaseStack,
    pub migration: MigrationStack,
}

pub fn build_application(config: &DeploymentConfig) -> Result<Application, SynthError> {
    config.validate()?;

    let mut app = App::new();
    let network = build_network_stack(&mut app, config)?;
    let database = build_database_stack(&mut app, config, &network)?;
    let migration = build_migration_stack(&mut app, config, &network, &database)?;
    app.add_dependency(migration.stack, database.stack)?;

    Ok(Application {
        app,
        network,
        database,
        migration,
    })
}

pub fn synth_application(config: &DeploymentConfig) -> Result<CloudAssembly, SynthError> {
    build_application(config)?.app.synth()
}
