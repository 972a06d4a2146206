use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::assembly::{App, Reference, StackId};
use crate::error::SynthError;
use crate::template::{join, logical_id, pseudo, ref_, Resource, AWS_PARTITION};

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
}

impl Effect {
    fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "Allow",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    pub effect: Effect,
    pub actions: Vec<String>,
    pub resources: Vec<Value>,
}

impl PolicyStatement {
    pub fn allow() -> Self {
        Self {
            effect: Effect::Allow,
            actions: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn add_actions(mut self, actions: &[&str]) -> Self {
        self.actions
            .extend(actions.iter().map(|action| action.to_string()));
        self
    }

    pub fn add_resource(mut self, resource: impl Into<Value>) -> Self {
        self.resources.push(resource.into());
        self
    }

    /// CloudFormation accepts a bare value where a list has one element.
    pub fn to_json(&self) -> Value {
        let mut statement = Map::new();
        statement.insert("Action".to_string(), single_or_list(
            self.actions.iter().map(|action| Value::from(action.as_str())).collect(),
        ));
        statement.insert("Effect".to_string(), Value::from(self.effect.as_str()));
        statement.insert("Resource".to_string(), single_or_list(self.resources.clone()));
        Value::Object(statement)
    }
}

fn single_or_list(mut values: Vec<Value>) -> Value {
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::Array(values)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDocument {
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self { statements }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "Statement": self.statements.iter().map(PolicyStatement::to_json).collect::<Vec<_>>(),
            "Version": POLICY_VERSION,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePrincipal(pub String);

impl ServicePrincipal {
    pub fn new(service: impl Into<String>) -> Self {
        Self(service.into())
    }

    pub fn lambda() -> Self {
        Self::new("lambda.amazonaws.com")
    }

    fn assume_role_policy(&self) -> Value {
        json!({
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": { "Service": self.0 },
            }],
            "Version": POLICY_VERSION,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagedPolicy {
    arn: Value,
}

impl ManagedPolicy {
    pub fn aws_managed(name: &str) -> Self {
        Self {
            arn: join(
                "",
                vec![
                    Value::from("arn:"),
                    pseudo(AWS_PARTITION),
                    Value::from(format!(":iam::aws:policy/{name}")),
                ],
            ),
        }
    }

    pub fn lambda_basic_execution() -> Self {
        Self::aws_managed("service-role/AWSLambdaBasicExecutionRole")
    }

    pub fn arn(&self) -> &Value {
        &self.arn
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleProps {
    pub assumed_by: ServicePrincipal,
    pub inline_policies: BTreeMap<String, PolicyDocument>,
    pub managed_policies: Vec<ManagedPolicy>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Role {
    id: String,
    role: Reference,
    default_policy: Option<Reference>,
    default_statements: Vec<PolicyStatement>,
}

impl Role {
    pub fn new(app: &mut App, stack: StackId, id: &str, props: RoleProps) -> Result<Self, SynthError> {
        let mut resource = Resource::new("AWS::IAM::Role")
            .property("AssumeRolePolicyDocument", props.assumed_by.assume_role_policy());
        if !props.managed_policies.is_empty() {
            resource = resource.property(
                "ManagedPolicyArns",
                props
                    .managed_policies
                    .iter()
                    .map(|policy| policy.arn.clone())
                    .collect::<Vec<_>>(),
            );
        }
        if !props.inline_policies.is_empty() {
            resource = resource.property(
                "Policies",
                props
                    .inline_policies
                    .iter()
                    .map(|(name, document)| {
                        json!({ "PolicyDocument": document.to_json(), "PolicyName": name })
                    })
                    .collect::<Vec<_>>(),
            );
        }

        let role = app.add_resource(stack, id, resource)?;
        Ok(Self {
            id: id.to_string(),
            role,
            default_policy: None,
            default_statements: Vec::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stack(&self) -> StackId {
        self.role.stack()
    }

    pub fn role_ref(&self) -> &Reference {
        &self.role
    }

    pub fn arn(&self) -> Reference {
        self.role.get_att("Arn")
    }

    pub fn default_policy(&self) -> Option<&Reference> {
        self.default_policy.as_ref()
    }

    /// Appends `statement` to the role's default policy, creating the policy
    /// resource on first use. Statement values must already be resolved for
    /// the role's stack.
    pub fn add_to_policy(&mut self, app: &mut App, statement: PolicyStatement) -> Result<(), SynthError> {
        self.default_statements.push(statement);
        let document = PolicyDocument::new(self.default_statements.clone()).to_json();

        match &self.default_policy {
            Some(policy) => {
                app.resource_mut(policy)?
                    .properties
                    .insert("PolicyDocument".to_string(), document);
            }
            None => {
                let policy_id = logical_id(&[self.id.as_str(), "DefaultPolicy"]);
                let policy = app.add_resource(
                    self.stack(),
                    &policy_id,
                    Resource::new("AWS::IAM::Policy")
                        .property("PolicyDocument", document)
                        .property("PolicyName", policy_id.as_str())
                        .property("Roles", json!([ref_(&self.id)])),
                )?;
                self.default_policy = Some(policy);
            }
        }
        Ok(())
    }
}
