use std::collections::BTreeSet;

use aurora_migration_core::contract::{CustomResourceEvent, OnEventResponse};
use aurora_migration_lambda::adapters::migrator::{
    ConnectionSettings, MigrationReport, SchemaMigrator,
};
use aurora_migration_lambda::adapters::secrets::SecretSource;
use aurora_migration_lambda::handlers::on_event::{handle_on_event, MigrationHandlerConfig};
use aurora_migration_lambda::logging::init_logging;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use sqlx::migrate::{Migrate, Migrator};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Connection, PgConnection};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

struct SecretsManagerSource {
    client: aws_sdk_secretsmanager::Client,
}

impl SecretSource for SecretsManagerSource {
    fn secret_string(&self, secret_id: &str) -> Result<String, String> {
        let client = self.client.clone();
        let secret_id = secret_id.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = client
                    .get_secret_value()
                    .secret_id(secret_id)
                    .send()
                    .await
                    .map_err(|error| format!("failed to get secret value: {error}"))?;
                output
                    .secret_string()
                    .map(str::to_string)
                    .ok_or_else(|| "secret has no SecretString".to_string())
            })
        })
    }
}

struct PostgresMigrator;

impl SchemaMigrator for PostgresMigrator {
    fn apply(&self, settings: &ConnectionSettings) -> Result<MigrationReport, String> {
        let options = PgConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .database(&settings.database)
            .username(&settings.username)
            .password(&settings.password)
            .ssl_mode(PgSslMode::Require);

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let mut connection = PgConnection::connect_with(&options)
                    .await
                    .map_err(|error| format!("failed to connect to database: {error}"))?;

                let before = applied_versions(&mut connection).await?;
                MIGRATOR
                    .run(&mut connection)
                    .await
                    .map_err(|error| format!("failed to run migrations: {error}"))?;
                let after = applied_versions(&mut connection).await?;

                if let Err(error) = connection.close().await {
                    tracing::warn!(component = "migration_handler", error = %error, "closing connection failed");
                }

                Ok(MigrationReport {
                    applied: after.difference(&before).copied().collect(),
                    latest_version: after.last().copied(),
                })
            })
        })
    }
}

async fn applied_versions(connection: &mut PgConnection) -> Result<BTreeSet<i64>, String> {
    connection
        .ensure_migrations_table()
        .await
        .map_err(|error| format!("failed to prepare migrations table: {error}"))?;
    let applied = connection
        .list_applied_migrations()
        .await
        .map_err(|error| format!("failed to list applied migrations: {error}"))?;
    Ok(applied.into_iter().map(|migration| migration.version).collect())
}

async fn handle_request(event: LambdaEvent<CustomResourceEvent>) -> Result<OnEventResponse, Error> {
    let config = MigrationHandlerConfig::from_env()?;
    let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region.clone()))
        .load()
        .await;
    let secrets = SecretsManagerSource {
        client: aws_sdk_secretsmanager::Client::new(&aws_config),
    };

    Ok(handle_on_event(&event.payload, &config, &secrets, &PostgresMigrator)?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();
    lambda_runtime::run(service_fn(handle_request)).await
}
