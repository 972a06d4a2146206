use aurora_migration_core::contract::{
    CustomResourceEvent, CustomResourceRequestType, DatabaseSecretValue, OnEventResponse,
    ENV_DATABASE_SECRET_NAME, ENV_REGION,
};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info};

use crate::adapters::migrator::{ConnectionSettings, MigrationReport, SchemaMigrator};
use crate::adapters::secrets::SecretSource;

/// Physical id reported when CloudFormation has not assigned one yet.
pub const DEFAULT_PHYSICAL_RESOURCE_ID: &str = "database-migration";

/// Engines the secret attachment may report for an Aurora PostgreSQL cluster.
const POSTGRES_ENGINES: [&str; 2] = ["postgres", "aurora-postgresql"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MigrationHandlerError {
    #[error("{0} must be configured")]
    MissingConfig(&'static str),

    #[error("failed to read secret '{secret}': {message}")]
    SecretUnavailable { secret: String, message: String },

    #[error("secret '{secret}' is not a database secret: {message}")]
    MalformedSecret { secret: String, message: String },

    #[error("unsupported database engine '{0}', expected PostgreSQL")]
    UnsupportedEngine(String),

    #[error("schema migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationHandlerConfig {
    pub secret_name: String,
    pub region: String,
}

impl MigrationHandlerConfig {
    pub fn from_env() -> Result<Self, MigrationHandlerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, MigrationHandlerError> {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or(MigrationHandlerError::MissingConfig(key))
        };
        Ok(Self {
            secret_name: required(ENV_DATABASE_SECRET_NAME)?,
            region: required(ENV_REGION)?,
        })
    }
}

/// `onEvent` entry point. Create and Update apply pending migrations. Delete
/// is acknowledged without connecting.
pub fn handle_on_event(
    event: &CustomResourceEvent,
    config: &MigrationHandlerConfig,
    secrets: &dyn SecretSource,
    migrator: &dyn SchemaMigrator,
) -> Result<OnEventResponse, MigrationHandlerError> {
    let physical_resource_id = event
        .physical_resource_id
        .clone()
        .unwrap_or_else(|| DEFAULT_PHYSICAL_RESOURCE_ID.to_string());

    if event.request_type == CustomResourceRequestType::Delete {
        info!(
            component = "migration_handler",
            event = "migration_skipped",
            logical_resource_id = %event.logical_resource_id,
            physical_resource_id = %physical_resource_id,
            "delete leaves the schema in place"
        );
        return Ok(OnEventResponse {
            physical_resource_id: Some(physical_resource_id),
            ..OnEventResponse::default()
        });
    }

    info!(
        component = "migration_handler",
        event = "migration_started",
        request_type = ?event.request_type,
        request_id = %event.request_id,
        secret_name = %config.secret_name,
        region = %config.region,
    );

    let report = match run_migrations(config, secrets, migrator) {
        Ok(report) => report,
        Err(failure) => {
            error!(
                component = "migration_handler",
                event = "migration_failed",
                request_id = %event.request_id,
                error = %failure,
            );
            return Err(failure);
        }
    };

    info!(
        component = "migration_handler",
        event = "migration_completed",
        request_id = %event.request_id,
        applied = report.applied.len(),
        latest_version = ?report.latest_version,
    );

    Ok(OnEventResponse {
        physical_resource_id: Some(physical_resource_id),
        data: Some(report_data(&report)),
        no_echo: None,
    })
}

fn run_migrations(
    config: &MigrationHandlerConfig,
    secrets: &dyn SecretSource,
    migrator: &dyn SchemaMigrator,
) -> Result<MigrationReport, MigrationHandlerError> {
    let secret_string = secrets.secret_string(&config.secret_name).map_err(|message| {
        MigrationHandlerError::SecretUnavailable {
            secret: config.secret_name.clone(),
            message,
        }
    })?;
    // Only the error position goes into the message; serde_json echoes values.
    let secret: DatabaseSecretValue = serde_json::from_str(&secret_string).map_err(|error| {
        MigrationHandlerError::MalformedSecret {
            secret: config.secret_name.clone(),
            message: format!(
                "{:?} error at line {} column {}",
                error.classify(),
                error.line(),
                error.column()
            ),
        }
    })?;

    let settings = connection_settings(secret)?;
    migrator
        .apply(&settings)
        .map_err(MigrationHandlerError::MigrationFailed)
}

pub fn connection_settings(
    secret: DatabaseSecretValue,
) -> Result<ConnectionSettings, MigrationHandlerError> {
    if !POSTGRES_ENGINES.contains(&secret.engine.as_str()) {
        return Err(MigrationHandlerError::UnsupportedEngine(secret.engine));
    }
    Ok(ConnectionSettings {
        host: secret.host,
        port: secret.port,
        database: secret.dbname,
        username: secret.username,
        password: secret.password,
    })
}

fn report_data(report: &MigrationReport) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert(
        "AppliedMigrations".to_string(),
        Value::from(report.applied.len()),
    );
    data.insert(
        "LatestVersion".to_string(),
        report
            .latest_version
            .map(|version| Value::from(version.to_string()))
            .unwrap_or(Value::Null),
    );
    data
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    struct StaticSecrets {
        values: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
    }

    impl StaticSecrets {
        fn with(secret_id: &str, value: Value) -> Self {
            Self {
                values: HashMap::from([(secret_id.to_string(), value.to_string())]),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().expect("poisoned mutex").clone()
        }
    }

    impl SecretSource for StaticSecrets {
        fn secret_string(&self, secret_id: &str) -> Result<String, String> {
            self.requested
                .lock()
                .expect("poisoned mutex")
                .push(secret_id.to_string());
            self.values
                .get(secret_id)
                .cloned()
                .ok_or_else(|| format!("secret {secret_id} not found"))
        }
    }

    struct CapturingMigrator {
        calls: Mutex<Vec<ConnectionSettings>>,
        result: Result<MigrationReport, String>,
    }

    impl CapturingMigrator {
        fn returning(result: Result<MigrationReport, String>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                result,
            }
        }

        fn calls(&self) -> Vec<ConnectionSettings> {
            self.calls.lock().expect("poisoned mutex").clone()
        }
    }

    impl SchemaMigrator for CapturingMigrator {
        fn apply(&self, settings: &ConnectionSettings) -> Result<MigrationReport, String> {
            self.calls
                .lock()
                .expect("poisoned mutex")
                .push(settings.clone());
            self.result.clone()
        }
    }

    const SECRET_NAME: &str = "/aurora/databaseSecrets";

    fn config() -> MigrationHandlerConfig {
        MigrationHandlerConfig {
            secret_name: SECRET_NAME.to_string(),
            region: "eu-central-1".to_string(),
        }
    }

    fn secret(engine: &str) -> Value {
        json!({
            "dbClusterIdentifier": "democluster",
            "password": "s3cret-password",
            "dbname": "demo",
            "engine": engine,
            "port": 5432,
            "host": "democluster.cluster-abc.eu-central-1.rds.amazonaws.com",
            "username": "clusteradmin"
        })
    }

    fn event(request_type: CustomResourceRequestType, physical_id: Option<&str>) -> CustomResourceEvent {
        CustomResourceEvent {
            request_type,
            service_token: "arn:aws:lambda:eu-central-1:123456789012:function:framework".to_string(),
            response_url: "https://example.com/response".to_string(),
            stack_id: "arn:aws:cloudformation:eu-central-1:123456789012:stack/Migration/1".to_string(),
            request_id: "req-1".to_string(),
            logical_resource_id: "DatabaseMigrationResource".to_string(),
            physical_resource_id: physical_id.map(str::to_string),
            resource_type: "AWS::CloudFormation::CustomResource".to_string(),
            resource_properties: Map::from_iter([(
                "date".to_string(),
                Value::from("Wed, 14 Oct 2026 08:03:00 GMT"),
            )]),
            old_resource_properties: None,
        }
    }

    fn applied(versions: &[i64]) -> MigrationReport {
        MigrationReport {
            applied: versions.to_vec(),
            latest_version: versions.last().copied(),
        }
    }

    #[test]
    fn create_applies_migrations_with_secret_credentials() {
        let secrets = StaticSecrets::with(SECRET_NAME, secret("postgres"));
        let migrator = CapturingMigrator::returning(Ok(applied(&[20240101000000])));

        let response = handle_on_event(
            &event(CustomResourceRequestType::Create, None),
            &config(),
            &secrets,
            &migrator,
        )
        .expect("create should succeed");

        assert_eq!(secrets.requested(), vec![SECRET_NAME.to_string()]);
        let calls = migrator.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].database, "demo");
        assert_eq!(calls[0].port, 5432);
        assert_eq!(calls[0].username, "clusteradmin");
        assert_eq!(calls[0].password, "s3cret-password");

        assert_eq!(
            response.physical_resource_id.as_deref(),
            Some(DEFAULT_PHYSICAL_RESOURCE_ID)
        );
        let data = response.data.expect("data");
        assert_eq!(data["AppliedMigrations"], 1);
        assert_eq!(data["LatestVersion"], "20240101000000");
    }

    #[test]
    fn update_keeps_physical_id_and_reports_noop_runs() {
        let secrets = StaticSecrets::with(SECRET_NAME, secret("aurora-postgresql"));
        let migrator = CapturingMigrator::returning(Ok(MigrationReport {
            applied: Vec::new(),
            latest_version: Some(20240101000000),
        }));

        let response = handle_on_event(
            &event(CustomResourceRequestType::Update, Some("existing-id")),
            &config(),
            &secrets,
            &migrator,
        )
        .expect("update should succeed");

        assert_eq!(response.physical_resource_id.as_deref(), Some("existing-id"));
        assert_eq!(migrator.calls().len(), 1);
        assert_eq!(response.data.expect("data")["AppliedMigrations"], 0);
    }

    #[test]
    fn delete_does_not_touch_the_database() {
        let secrets = StaticSecrets::with(SECRET_NAME, secret("postgres"));
        let migrator = CapturingMigrator::returning(Ok(applied(&[1])));

        let response = handle_on_event(
            &event(CustomResourceRequestType::Delete, Some("existing-id")),
            &config(),
            &secrets,
            &migrator,
        )
        .expect("delete should succeed");

        assert_eq!(response.physical_resource_id.as_deref(), Some("existing-id"));
        assert!(response.data.is_none());
        assert!(secrets.requested().is_empty());
        assert!(migrator.calls().is_empty());
    }

    #[test]
    fn rejects_non_postgres_engines_before_migrating() {
        let secrets = StaticSecrets::with(SECRET_NAME, secret("mysql"));
        let migrator = CapturingMigrator::returning(Ok(applied(&[1])));

        let error = handle_on_event(
            &event(CustomResourceRequestType::Create, None),
            &config(),
            &secrets,
            &migrator,
        )
        .expect_err("mysql should be rejected");

        assert_eq!(error, MigrationHandlerError::UnsupportedEngine("mysql".to_string()));
        assert!(migrator.calls().is_empty());
    }

    #[test]
    fn migration_failure_surfaces_as_error() {
        let secrets = StaticSecrets::with(SECRET_NAME, secret("postgres"));
        let migrator = CapturingMigrator::returning(Err("relation already exists".to_string()));

        let error = handle_on_event(
            &event(CustomResourceRequestType::Create, None),
            &config(),
            &secrets,
            &migrator,
        )
        .expect_err("failure should propagate");
        assert_eq!(
            error.to_string(),
            "schema migration failed: relation already exists"
        );
    }

    #[test]
    fn missing_or_malformed_secret_is_reported_without_contents() {
        let migrator = CapturingMigrator::returning(Ok(applied(&[1])));

        let missing = StaticSecrets::with("/other", secret("postgres"));
        let error = handle_on_event(
            &event(CustomResourceRequestType::Create, None),
            &config(),
            &missing,
            &migrator,
        )
        .expect_err("missing secret should fail");
        assert!(matches!(error, MigrationHandlerError::SecretUnavailable { .. }));

        let malformed = StaticSecrets::with(SECRET_NAME, json!({"password": "hunter2"}));
        let error = handle_on_event(
            &event(CustomResourceRequestType::Create, None),
            &config(),
            &malformed,
            &migrator,
        )
        .expect_err("malformed secret should fail");
        assert!(matches!(error, MigrationHandlerError::MalformedSecret { .. }));
        assert!(!error.to_string().contains("hunter2"));
    }

    #[test]
    fn config_requires_secret_name_and_region() {
        let env = HashMap::from([
            (ENV_DATABASE_SECRET_NAME, SECRET_NAME.to_string()),
            (ENV_REGION, "   ".to_string()),
        ]);
        let error = MigrationHandlerConfig::from_lookup(|key| env.get(key).cloned())
            .expect_err("blank region should fail");
        assert_eq!(error.to_string(), "REGION must be configured");

        let env = HashMap::from([
            (ENV_DATABASE_SECRET_NAME, SECRET_NAME.to_string()),
            (ENV_REGION, "eu-central-1".to_string()),
        ]);
        let config = MigrationHandlerConfig::from_lookup(|key| env.get(key).cloned())
            .expect("complete env");
        assert_eq!(config, self::config());
    }

    #[test]
    fn connection_settings_debug_hides_password() {
        let secret: DatabaseSecretValue =
            serde_json::from_value(secret("postgres")).expect("secret parses");
        let settings = connection_settings(secret).expect("postgres");
        assert!(!format!("{settings:?}").contains("s3cret-password"));
    }
}
