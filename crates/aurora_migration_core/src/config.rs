use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::assembly::Environment;
use crate::constructs::ec2::VpcProps;
use crate::constructs::lambda::{check_memory_size, check_timeout, LambdaAsset};
use crate::constructs::rds::{check_auto_pause, AuroraCapacityUnit, AuroraPostgresEngineVersion};
use crate::error::ConfigError;

pub const DEFAULT_APPLICATION_STACK_NAME: &str = "ApplicationStack";
pub const DATABASE_PORT: u16 = 5432;
pub const DEFAULT_DATABASE_USERNAME: &str = "clusteradmin";
pub const DEFAULT_DATABASE_SECRET_NAME: &str = "/aurora/databaseSecrets";
pub const DEFAULT_DATABASE_NAME: &str = "demo";

/// Auto pause after five idle minutes.
const DEFAULT_AUTO_PAUSE: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MIGRATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MIGRATION_MEMORY_MB: u32 = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub port: u16,
    pub username: String,
    pub secret_name: String,
    pub default_database_name: String,
    pub engine_version: AuroraPostgresEngineVersion,
    pub min_capacity: AuroraCapacityUnit,
    pub max_capacity: AuroraCapacityUnit,
    pub auto_pause: Duration,
    pub enable_data_api: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            port: DATABASE_PORT,
            username: DEFAULT_DATABASE_USERNAME.to_string(),
            secret_name: DEFAULT_DATABASE_SECRET_NAME.to_string(),
            default_database_name: DEFAULT_DATABASE_NAME.to_string(),
            engine_version: AuroraPostgresEngineVersion::VER_11_16,
            min_capacity: AuroraCapacityUnit::Acu2,
            max_capacity: AuroraCapacityUnit::Acu4,
            auto_pause: DEFAULT_AUTO_PAUSE,
            enable_data_api: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFunctionSettings {
    pub timeout: Duration,
    pub memory_size_mb: u32,
}

impl Default for MigrationFunctionSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_MIGRATION_TIMEOUT,
            memory_size_mb: DEFAULT_MIGRATION_MEMORY_MB,
        }
    }
}

/// Everything needed to synthesize the application. The timestamp is an input
/// so synthesis itself stays deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentConfig {
    pub application_stack_name: String,
    pub environment: Environment,
    pub synthesized_at: DateTime<Utc>,
    pub migration_handler_asset: LambdaAsset,
    pub provider_framework_asset: LambdaAsset,
    pub vpc: VpcProps,
    pub database: DatabaseSettings,
    pub migration_function: MigrationFunctionSettings,
}

impl DeploymentConfig {
    pub fn new(
        environment: Environment,
        synthesized_at: DateTime<Utc>,
        migration_handler_asset: LambdaAsset,
        provider_framework_asset: LambdaAsset,
    ) -> Self {
        Self {
            application_stack_name: DEFAULT_APPLICATION_STACK_NAME.to_string(),
            environment,
            synthesized_at,
            migration_handler_asset,
            provider_framework_asset,
            vpc: VpcProps::default(),
            database: DatabaseSettings::default(),
            migration_function: MigrationFunctionSettings::default(),
        }
    }

    pub fn database_stack_name(&self) -> String {
        format!("{}-DatabaseStack", self.application_stack_name)
    }

    pub fn migration_stack_name(&self) -> String {
        format!("{}-DatabaseMigrationStack", self.application_stack_name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_stack_name.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "application_stack_name",
            });
        }
        if self.database.port == 0 {
            return Err(ConfigError::invalid("database.port", "must be non-zero"));
        }
        if self.database.username.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "database.username",
            });
        }
        if self.database.secret_name.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "database.secret_name",
            });
        }
        if self.database.min_capacity > self.database.max_capacity {
            return Err(ConfigError::invalid(
                "database.min_capacity",
                format!(
                    "{} ACU exceeds max_capacity {} ACU",
                    self.database.min_capacity.units(),
                    self.database.max_capacity.units()
                ),
            ));
        }
        check_auto_pause(self.database.auto_pause)
            .map_err(|message| ConfigError::invalid("database.auto_pause", message))?;
        check_memory_size(self.migration_function.memory_size_mb)
            .map_err(|message| ConfigError::invalid("migration_function.memory_size_mb", message))?;
        check_timeout(self.migration_function.timeout)
            .map_err(|message| ConfigError::invalid("migration_function.timeout", message))?;
        validate_asset("migration_handler_asset", &self.migration_handler_asset)?;
        validate_asset("provider_framework_asset", &self.provider_framework_asset)?;
        Ok(())
    }
}

fn validate_asset(field: &'static str, asset: &LambdaAsset) -> Result<(), ConfigError> {
    let is_sha256_hex =
        asset.hash.len() == 64 && asset.hash.chars().all(|c| c.is_ascii_hexdigit());
    if !is_sha256_hex {
        return Err(ConfigError::invalid(
            field,
            format!("'{}' is not a sha256 hex digest", asset.hash),
        ));
    }
    Ok(())
}
