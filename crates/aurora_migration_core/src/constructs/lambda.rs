use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Map, Value};

use crate::assembly::{App, FileAsset, Reference, StackId};
use crate::constructs::iam::Role;
use crate::error::SynthError;
use crate::synth::asset_hash;
use crate::template::{sub, Resource};

/// Bootstrap bucket created by the standard CDK bootstrap stack.
pub const ASSET_BUCKET: &str = "cdk-hnb659fds-assets-${AWS::AccountId}-${AWS::Region}";
pub const BOOTSTRAP_HANDLER: &str = "bootstrap";

const MIN_MEMORY_MB: u32 = 128;
const MAX_MEMORY_MB: u32 = 10_240;
const MAX_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// A zipped Lambda bundle addressed by the SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LambdaAsset {
    pub path: PathBuf,
    pub hash: String,
}

impl LambdaAsset {
    pub fn new(path: impl Into<PathBuf>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: hash.into(),
        }
    }

    pub fn from_bytes(path: impl Into<PathBuf>, bytes: &[u8]) -> Self {
        Self::new(path, asset_hash(bytes))
    }

    pub fn s3_key(&self) -> String {
        format!("{}.zip", self.hash)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
    ProvidedAl2023,
}

impl Runtime {
    pub fn name(self) -> &'static str {
        match self {
            Self::ProvidedAl2023 => "provided.al2023",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VpcPlacement {
    pub subnets: Vec<Reference>,
    pub security_groups: Vec<Reference>,
}

#[derive(Debug, Clone)]
pub struct FunctionProps<'a> {
    pub runtime: Runtime,
    pub handler: String,
    pub asset: &'a LambdaAsset,
    pub description: Option<String>,
    pub environment: BTreeMap<String, Value>,
    pub vpc: Option<VpcPlacement>,
    pub timeout: Duration,
    pub memory_size_mb: u32,
    pub role: &'a Role,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    id: String,
    function: Reference,
}

impl Function {
    pub fn new(app: &mut App, stack: StackId, id: &str, props: FunctionProps<'_>) -> Result<Self, SynthError> {
        validate_limits(id, &props)?;

        let role_arn = app.resolve(stack, &props.role.arn())?;
        app.add_asset(
            stack,
            FileAsset {
                hash: props.asset.hash.clone(),
                path: props.asset.path.clone(),
            },
        )?;

        let mut resource = Resource::new("AWS::Lambda::Function")
            .property(
                "Code",
                json!({ "S3Bucket": sub(ASSET_BUCKET), "S3Key": props.asset.s3_key() }),
            )
            .property("Handler", props.handler.as_str())
            .property("MemorySize", props.memory_size_mb)
            .property("Role", role_arn)
            .property("Runtime", props.runtime.name())
            .property("Timeout", props.timeout.as_secs());

        if let Some(description) = props.description {
            resource = resource.property("Description", description);
        }
        if !props.environment.is_empty() {
            let variables: Map<String, Value> = props.environment.into_iter().collect();
            resource = resource.property("Environment", json!({ "Variables": variables }));
        }
        if let Some(placement) = props.vpc {
            if placement.subnets.is_empty() {
                return Err(SynthError::EmptySubnetSelection(id.to_string()));
            }
            let subnet_ids = app.resolve_all(stack, &placement.subnets)?;
            let security_group_ids = app.resolve_all(stack, &placement.security_groups)?;
            resource = resource.property(
                "VpcConfig",
                json!({ "SecurityGroupIds": security_group_ids, "SubnetIds": subnet_ids }),
            );
        }

        if props.role.stack() == stack {
            resource = resource.depends_on(props.role.id());
            if let Some(policy) = props.role.default_policy() {
                resource = resource.depends_on(policy.logical_id());
            }
        }

        let function = app.add_resource(stack, id, resource)?;
        Ok(Self {
            id: id.to_string(),
            function,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stack(&self) -> StackId {
        self.function.stack()
    }

    pub fn function_ref(&self) -> &Reference {
        &self.function
    }

    pub fn arn(&self) -> Reference {
        self.function.get_att("Arn")
    }
}

fn validate_limits(id: &str, props: &FunctionProps<'_>) -> Result<(), SynthError> {
    let invalid = |reason: String| SynthError::InvalidFunctionConfig {
        function: id.to_string(),
        reason,
    };
    check_memory_size(props.memory_size_mb).map_err(invalid)?;
    check_timeout(props.timeout).map_err(invalid)?;
    if props.handler.trim().is_empty() {
        return Err(invalid("handler must not be empty".to_string()));
    }
    Ok(())
}

pub(crate) fn check_memory_size(memory_size_mb: u32) -> Result<(), String> {
    if !(MIN_MEMORY_MB..=MAX_MEMORY_MB).contains(&memory_size_mb) {
        return Err(format!(
            "memory must be between {MIN_MEMORY_MB} and {MAX_MEMORY_MB} MB, got {memory_size_mb}"
        ));
    }
    Ok(())
}

pub(crate) fn check_timeout(timeout: Duration) -> Result<(), String> {
    if timeout.as_secs() == 0 || timeout > MAX_TIMEOUT || timeout.subsec_nanos() != 0 {
        return Err(format!(
            "timeout must be whole seconds between 1s and 15 minutes, got {timeout:?}"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::assembly::Environment;
    use crate::constructs::iam::{ManagedPolicy, RoleProps, ServicePrincipal};

    use super::*;

    fn setup() -> (App, StackId, Role, LambdaAsset) {
        let mut app = App::new();
        let stack = app
            .add_stack("Functions", Environment::agnostic(), None)
            .expect("stack");
        let role = Role::new(
            &mut app,
            stack,
            "FnRole",
            RoleProps {
                assumed_by: ServicePrincipal::lambda(),
                inline_policies: BTreeMap::new(),
                managed_policies: vec![ManagedPolicy::lambda_basic_execution()],
            },
        )
        .expect("role");
        let asset = LambdaAsset::from_bytes("dist/handler.zip", b"bootstrap");
        (app, stack, role, asset)
    }

    fn props<'a>(role: &'a Role, asset: &'a LambdaAsset) -> FunctionProps<'a> {
        FunctionProps {
            runtime: Runtime::ProvidedAl2023,
            handler: BOOTSTRAP_HANDLER.to_string(),
            asset,
            description: None,
            environment: BTreeMap::from([("MODE".to_string(), Value::from("test"))]),
            vpc: None,
            timeout: Duration::from_secs(30),
            memory_size_mb: 256,
            role,
        }
    }

    #[test]
    fn emits_code_location_and_registers_asset() {
        let (mut app, stack, role, asset) = setup();
        Function::new(&mut app, stack, "Handler", props(&role, &asset)).expect("function");

        let stack_ref = app.stack(stack).expect("stack");
        let function = &stack_ref.template().resources["Handler"];
        assert_eq!(function.properties["Code"]["S3Key"], format!("{}.zip", asset.hash));
        assert_eq!(function.properties["Runtime"], "provided.al2023");
        assert_eq!(function.properties["Environment"]["Variables"]["MODE"], "test");
        assert_eq!(function.depends_on, vec!["FnRole"]);
        assert_eq!(stack_ref.assets().count(), 1);
    }

    #[test]
    fn rejects_out_of_range_limits() {
        let (mut app, stack, role, asset) = setup();
        let mut oversized = props(&role, &asset);
        oversized.memory_size_mb = 64;
        assert!(matches!(
            Function::new(&mut app, stack, "Small", oversized),
            Err(SynthError::InvalidFunctionConfig { .. })
        ));

        let mut slow = props(&role, &asset);
        slow.timeout = Duration::from_secs(16 * 60);
        assert!(Function::new(&mut app, stack, "Slow", slow).is_err());
    }

    #[test]
    fn vpc_placement_requires_subnets() {
        let (mut app, stack, role, asset) = setup();
        let mut placed = props(&role, &asset);
        placed.vpc = Some(VpcPlacement {
            subnets: Vec::new(),
            security_groups: Vec::new(),
        });
        assert!(matches!(
            Function::new(&mut app, stack, "Placed", placed),
            Err(SynthError::EmptySubnetSelection(_))
        ));
    }
}
