#![allow(dead_code)]

use aurora_migration_core::constructs::lambda::LambdaAsset;
use aurora_migration_core::template::{Resource, Template};
use aurora_migration_core::{DeploymentConfig, Environment};
use chrono::{DateTime, TimeZone, Utc};

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "eu-central-1";

pub fn synthesized_at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 14, hour, 3, 0)
        .single()
        .expect("valid fixture instant")
}

pub fn migration_asset() -> LambdaAsset {
    LambdaAsset::from_bytes("dist/migration_handler.zip", b"migration handler bootstrap")
}

pub fn framework_asset() -> LambdaAsset {
    LambdaAsset::from_bytes("dist/provider_framework.zip", b"provider framework bootstrap")
}

/// Pinned environment, fixed timestamp and fake assets.
pub fn deployment_config() -> DeploymentConfig {
    DeploymentConfig::new(
        Environment::new(ACCOUNT, REGION),
        synthesized_at(8),
        migration_asset(),
        framework_asset(),
    )
}

pub fn agnostic_config() -> DeploymentConfig {
    DeploymentConfig {
        environment: Environment::agnostic(),
        ..deployment_config()
    }
}

pub fn only_resource_of_type<'a>(template: &'a Template, resource_type: &str) -> (&'a str, &'a Resource) {
    let mut matches = template.resources_of_type(resource_type);
    let (id, resource) = matches
        .next()
        .unwrap_or_else(|| panic!("expected a {resource_type}"));
    assert!(matches.next().is_none(), "expected exactly one {resource_type}");
    (id.as_str(), resource)
}
