use std::time::Duration;

use serde_json::{json, Value};

use crate::assembly::{App, Reference, StackId};
use crate::constructs::secretsmanager::{Credentials, DatabaseSecret};
use crate::error::SynthError;
use crate::template::{logical_id, RemovalPolicy, Resource};

const AURORA_POSTGRES_ENGINE: &str = "aurora-postgresql";
const MIN_AUTO_PAUSE: Duration = Duration::from_secs(5 * 60);
const MAX_AUTO_PAUSE: Duration = Duration::from_secs(24 * 60 * 60);

/// Aurora Serverless v1 capacity steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuroraCapacityUnit {
    Acu1,
    Acu2,
    Acu4,
    Acu8,
    Acu16,
    Acu32,
    Acu64,
    Acu128,
    Acu192,
    Acu256,
    Acu384,
}

impl AuroraCapacityUnit {
    pub fn units(self) -> u32 {
        match self {
            Self::Acu1 => 1,
            Self::Acu2 => 2,
            Self::Acu4 => 4,
            Self::Acu8 => 8,
            Self::Acu16 => 16,
            Self::Acu32 => 32,
            Self::Acu64 => 64,
            Self::Acu128 => 128,
            Self::Acu192 => 192,
            Self::Acu256 => 256,
            Self::Acu384 => 384,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuroraPostgresEngineVersion {
    full: &'static str,
    major: &'static str,
}

impl AuroraPostgresEngineVersion {
    pub const VER_11_16: Self = Self::new("11.16", "11");

    const fn new(full: &'static str, major: &'static str) -> Self {
        Self { full, major }
    }

    pub fn full_version(&self) -> &'static str {
        self.full
    }

    pub fn major_version(&self) -> &'static str {
        self.major
    }

    pub fn default_parameter_group_name(&self) -> String {
        format!("default.{AURORA_POSTGRES_ENGINE}{}", self.major)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerlessScaling {
    pub min_capacity: AuroraCapacityUnit,
    pub max_capacity: AuroraCapacityUnit,
    /// Zero disables auto pause.
    pub auto_pause: Duration,
}

impl ServerlessScaling {
    pub fn validate(&self) -> Result<(), SynthError> {
        if self.min_capacity > self.max_capacity {
            return Err(SynthError::InvalidScaling(format!(
                "min capacity {} ACU exceeds max capacity {} ACU",
                self.min_capacity.units(),
                self.max_capacity.units()
            )));
        }
        check_auto_pause(self.auto_pause).map_err(SynthError::InvalidScaling)
    }

    fn to_json(self) -> Value {
        let mut scaling = json!({
            "AutoPause": !self.auto_pause.is_zero(),
            "MaxCapacity": self.max_capacity.units(),
            "MinCapacity": self.min_capacity.units(),
        });
        if !self.auto_pause.is_zero() {
            scaling["SecondsUntilAutoPause"] = Value::from(self.auto_pause.as_secs());
        }
        scaling
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubnetGroup {
    group: Reference,
}

impl SubnetGroup {
    pub fn new(
        app: &mut App,
        stack: StackId,
        id: &str,
        description: &str,
        subnets: &[Reference],
    ) -> Result<Self, SynthError> {
        if subnets.is_empty() {
            return Err(SynthError::EmptySubnetSelection(id.to_string()));
        }
        let subnet_ids = app.resolve_all(stack, subnets)?;
        let group = app.add_resource(
            stack,
            id,
            Resource::new("AWS::RDS::DBSubnetGroup")
                .property("DBSubnetGroupDescription", description)
                .property("SubnetIds", subnet_ids),
        )?;
        Ok(Self { group })
    }

    pub fn group_ref(&self) -> &Reference {
        &self.group
    }
}

/// Zero (disabled) or a window between 5 minutes and 1 day.
pub(crate) fn check_auto_pause(auto_pause: Duration) -> Result<(), String> {
    if !auto_pause.is_zero() && (auto_pause < MIN_AUTO_PAUSE || auto_pause > MAX_AUTO_PAUSE) {
        return Err(format!(
            "auto pause must be between 5 minutes and 1 day, got {}s",
            auto_pause.as_secs()
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ServerlessClusterProps<'a> {
    pub engine_version: AuroraPostgresEngineVersion,
    pub credentials: &'a Credentials,
    pub enable_data_api: bool,
    pub default_database_name: Option<String>,
    pub subnet_group: &'a SubnetGroup,
    pub security_groups: Vec<Reference>,
    pub scaling: ServerlessScaling,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerlessCluster {
    id: String,
    cluster: Reference,
    secret: DatabaseSecret,
}

impl ServerlessCluster {
    pub fn new(
        app: &mut App,
        stack: StackId,
        id: &str,
        props: ServerlessClusterProps<'_>,
    ) -> Result<Self, SynthError> {
        props.scaling.validate()?;

        let secret_id = logical_id(&[id, "Secret"]);
        let secret = DatabaseSecret::new(app, stack, &secret_id, props.credentials)?;
        let master_username = secret.dynamic_reference(app, stack, "username")?;
        let master_password = secret.dynamic_reference(app, stack, "password")?;
        let subnet_group = app.resolve(stack, props.subnet_group.group_ref())?;
        let security_groups = app.resolve_all(stack, &props.security_groups)?;

        let mut resource = Resource::new("AWS::RDS::DBCluster")
            .property("DBClusterParameterGroupName", props.engine_version.default_parameter_group_name())
            .property("DBSubnetGroupName", subnet_group)
            .property("EnableHttpEndpoint", props.enable_data_api)
            .property("Engine", AURORA_POSTGRES_ENGINE)
            .property("EngineMode", "serverless")
            .property("EngineVersion", props.engine_version.full_version())
            .property("MasterUsername", master_username)
            .property("MasterUserPassword", master_password)
            .property("ScalingConfiguration", props.scaling.to_json())
            .property("StorageEncrypted", true)
            .property("VpcSecurityGroupIds", security_groups)
            .removal_policy(RemovalPolicy::Snapshot);
        if let Some(database_name) = props.default_database_name {
            resource = resource.property("DatabaseName", database_name);
        }

        let cluster = app.add_resource(stack, id, resource)?;
        secret.attach_to_cluster(app, &cluster)?;

        Ok(Self {
            id: id.to_string(),
            cluster,
            secret,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stack(&self) -> StackId {
        self.cluster.stack()
    }

    pub fn cluster_ref(&self) -> &Reference {
        &self.cluster
    }

    pub fn secret(&self) -> &DatabaseSecret {
        &self.secret
    }
}
