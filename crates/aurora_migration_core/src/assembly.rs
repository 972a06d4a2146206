//! Stacks, cross-stack references and the stack dependency DAG.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde_json::Value;

use crate::error::SynthError;
use crate::template::{
    get_att, import_value, logical_id, pseudo, ref_, Export, Output, Resource, Template,
    AWS_ACCOUNT_ID, AWS_REGION,
};

const MAX_STACK_NAME_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StackId(usize);

impl StackId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Target account and region of a stack. Unset fields make the stack
/// environment-agnostic and resolve to pseudo parameters at deploy time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl Environment {
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            account: Some(account.into()),
            region: Some(region.into()),
        }
    }

    pub fn agnostic() -> Self {
        Self::default()
    }

    pub fn account_value(&self) -> Value {
        match &self.account {
            Some(account) => Value::from(account.as_str()),
            None => pseudo(AWS_ACCOUNT_ID),
        }
    }

    pub fn region_value(&self) -> Value {
        match &self.region {
            Some(region) => Value::from(region.as_str()),
            None => pseudo(AWS_REGION),
        }
    }

    pub fn manifest_string(&self) -> String {
        format!(
            "aws://{}/{}",
            self.account.as_deref().unwrap_or("unknown-account"),
            self.region.as_deref().unwrap_or("unknown-region"),
        )
    }
}

/// A pointer to a resource (or one of its attributes) owned by a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Ref {
        stack: StackId,
        logical_id: String,
    },
    GetAtt {
        stack: StackId,
        logical_id: String,
        attribute: String,
    },
}

impl Reference {
    pub fn stack(&self) -> StackId {
        match self {
            Self::Ref { stack, .. } | Self::GetAtt { stack, .. } => *stack,
        }
    }

    pub fn logical_id(&self) -> &str {
        match self {
            Self::Ref { logical_id, .. } | Self::GetAtt { logical_id, .. } => logical_id,
        }
    }

    pub fn get_att(&self, attribute: &str) -> Reference {
        Reference::GetAtt {
            stack: self.stack(),
            logical_id: self.logical_id().to_string(),
            attribute: attribute.to_string(),
        }
    }

    fn local_value(&self) -> Value {
        match self {
            Self::Ref { logical_id, .. } => ref_(logical_id),
            Self::GetAtt {
                logical_id,
                attribute,
                ..
            } => get_att(logical_id, attribute),
        }
    }

    fn export_output_id(&self) -> String {
        match self {
            Self::Ref { logical_id: id, .. } => logical_id(&["ExportsOutputRef", id.as_str()]),
            Self::GetAtt {
                logical_id: id,
                attribute,
                ..
            } => logical_id(&["ExportsOutputFnGetAtt", id.as_str(), attribute.as_str()]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAsset {
    pub hash: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    environment: Environment,
    template: Template,
    explicit_dependencies: BTreeSet<StackId>,
    implicit_dependencies: BTreeSet<StackId>,
    assets: BTreeMap<String, FileAsset>,
}

impl Stack {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn assets(&self) -> impl Iterator<Item = &FileAsset> {
        self.assets.values()
    }

    pub fn template_file_name(&self) -> String {
        format!("{}.template.json", self.name)
    }

    pub fn assets_file_name(&self) -> String {
        format!("{}.assets.json", self.name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct App {
    stacks: Vec<Stack>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stack(
        &mut self,
        name: &str,
        environment: Environment,
        description: Option<String>,
    ) -> Result<StackId, SynthError> {
        validate_stack_name(name)?;
        if self.stacks.iter().any(|stack| stack.name == name) {
            return Err(SynthError::DuplicateStack(name.to_string()));
        }

        let template = Template {
            description,
            ..Template::default()
        };
        self.stacks.push(Stack {
            name: name.to_string(),
            environment,
            template,
            explicit_dependencies: BTreeSet::new(),
            implicit_dependencies: BTreeSet::new(),
            assets: BTreeMap::new(),
        });
        Ok(StackId(self.stacks.len() - 1))
    }

    pub fn stacks(&self) -> impl Iterator<Item = (StackId, &Stack)> {
        self.stacks
            .iter()
            .enumerate()
            .map(|(index, stack)| (StackId(index), stack))
    }

    pub fn stack(&self, id: StackId) -> Result<&Stack, SynthError> {
        self.stacks
            .get(id.0)
            .ok_or(SynthError::UnknownStack(id.0))
    }

    fn stack_mut(&mut self, id: StackId) -> Result<&mut Stack, SynthError> {
        self.stacks
            .get_mut(id.0)
            .ok_or(SynthError::UnknownStack(id.0))
    }

    pub fn add_resource(
        &mut self,
        stack: StackId,
        logical_id: &str,
        resource: Resource,
    ) -> Result<Reference, SynthError> {
        let target = self.stack_mut(stack)?;
        target
            .template
            .add_resource(&target.name, logical_id, resource)?;
        Ok(Reference::Ref {
            stack,
            logical_id: logical_id.to_string(),
        })
    }

    pub fn resource_mut(&mut self, reference: &Reference) -> Result<&mut Resource, SynthError> {
        let target = self.stack_mut(reference.stack())?;
        let stack_name = target.name.clone();
        target
            .template
            .resource_mut(reference.logical_id())
            .ok_or_else(|| SynthError::InvalidLogicalId(format!(
                "{stack_name}/{}",
                reference.logical_id()
            )))
    }

    pub fn add_asset(&mut self, stack: StackId, asset: FileAsset) -> Result<(), SynthError> {
        let target = self.stack_mut(stack)?;
        target.assets.insert(asset.hash.clone(), asset);
        Ok(())
    }

    /// Renders `reference` as seen from `consumer`. References into another
    /// stack are exported by the producer and imported by the consumer, which
    /// also records the implicit dependency edge.
    pub fn resolve(&mut self, consumer: StackId, reference: &Reference) -> Result<Value, SynthError> {
        let producer = reference.stack();
        self.stack(consumer)?;
        if producer == consumer {
            return Ok(reference.local_value());
        }

        let output_id = reference.export_output_id();
        let producer_stack = self.stack_mut(producer)?;
        let export_name = format!("{}:{output_id}", producer_stack.name);
        let output = Output {
            value: reference.local_value(),
            description: None,
            export: Some(Export {
                name: export_name.clone(),
            }),
        };
        producer_stack
            .template
            .add_output(&producer_stack.name, &output_id, output)?;

        self.stack_mut(consumer)?
            .implicit_dependencies
            .insert(producer);
        Ok(import_value(&export_name))
    }

    pub fn resolve_all(
        &mut self,
        consumer: StackId,
        references: &[Reference],
    ) -> Result<Vec<Value>, SynthError> {
        references
            .iter()
            .map(|reference| self.resolve(consumer, reference))
            .collect()
    }

    pub fn add_dependency(
        &mut self,
        dependent: StackId,
        dependency: StackId,
    ) -> Result<(), SynthError> {
        self.stack(dependency)?;
        let stack = self.stack_mut(dependent)?;
        if dependent == dependency {
            return Err(SynthError::SelfDependency(stack.name.clone()));
        }
        stack.explicit_dependencies.insert(dependency);
        Ok(())
    }

    pub fn explicit_dependencies_of(&self, stack: StackId) -> Result<Vec<StackId>, SynthError> {
        Ok(self
            .stack(stack)?
            .explicit_dependencies
            .iter()
            .copied()
            .collect())
    }

    pub fn dependencies_of(&self, stack: StackId) -> Result<Vec<StackId>, SynthError> {
        let target = self.stack(stack)?;
        Ok(target
            .explicit_dependencies
            .union(&target.implicit_dependencies)
            .copied()
            .collect())
    }

    /// Topological order of the stacks. Ties keep declaration order.
    pub fn deploy_order(&self) -> Result<Vec<StackId>, SynthError> {
        let count = self.stacks.len();
        let mut remaining_dependencies = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (index, _) in self.stacks.iter().enumerate() {
            for dependency in self.dependencies_of(StackId(index))? {
                remaining_dependencies[index] += 1;
                dependents[dependency.0].push(index);
            }
        }

        let mut ready: BTreeSet<usize> = (0..count)
            .filter(|index| remaining_dependencies[*index] == 0)
            .collect();
        let mut order = Vec::with_capacity(count);

        while let Some(index) = ready.pop_first() {
            order.push(StackId(index));
            for &dependent in &dependents[index] {
                remaining_dependencies[dependent] -= 1;
                if remaining_dependencies[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != count {
            let blocked = (0..count)
                .filter(|index| remaining_dependencies[*index] > 0)
                .map(|index| self.stacks[index].name.clone())
                .collect();
            return Err(SynthError::DependencyCycle(blocked));
        }

        Ok(order)
    }

    pub fn destroy_order(&self) -> Result<Vec<StackId>, SynthError> {
        let mut order = self.deploy_order()?;
        order.reverse();
        Ok(order)
    }
}

fn validate_stack_name(name: &str) -> Result<(), SynthError> {
    let starts_with_letter = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic())
        .unwrap_or(false);
    let valid_chars = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if !starts_with_letter || !valid_chars || name.len() > MAX_STACK_NAME_LEN {
        return Err(SynthError::InvalidStackName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn app_with_stacks(names: &[&str]) -> (App, Vec<StackId>) {
        let mut app = App::new();
        let ids = names
            .iter()
            .map(|name| {
                app.add_stack(name, Environment::agnostic(), None)
                    .expect("stack should be added")
            })
            .collect();
        (app, ids)
    }

    #[test]
    fn same_stack_reference_resolves_locally() {
        let (mut app, ids) = app_with_stacks(&["Network"]);
        let vpc = app
            .add_resource(ids[0], "Vpc", Resource::new("AWS::EC2::VPC"))
            .expect("resource should be added");

        let value = app.resolve(ids[0], &vpc).expect("resolve should pass");
        assert_eq!(value, json!({"Ref": "Vpc"}));
        assert!(app.stack(ids[0]).expect("stack").template().outputs.is_empty());
    }

    #[test]
    fn cross_stack_reference_exports_and_imports() {
        let (mut app, ids) = app_with_stacks(&["Network", "Database"]);
        let group = app
            .add_resource(ids[0], "DbGroup", Resource::new("AWS::EC2::SecurityGroup"))
            .expect("resource should be added");

        let value = app
            .resolve(ids[1], &group.get_att("GroupId"))
            .expect("resolve should pass");
        assert_eq!(
            value,
            json!({"Fn::ImportValue": "Network:ExportsOutputFnGetAttDbGroupGroupId"})
        );

        let producer = app.stack(ids[0]).expect("stack");
        let output = &producer.template().outputs["ExportsOutputFnGetAttDbGroupGroupId"];
        assert_eq!(output.value, json!({"Fn::GetAtt": ["DbGroup", "GroupId"]}));
        assert_eq!(app.dependencies_of(ids[1]).expect("deps"), vec![ids[0]]);
        assert!(app.explicit_dependencies_of(ids[1]).expect("deps").is_empty());

        app.resolve(ids[1], &group.get_att("GroupId"))
            .expect("second resolve should reuse export");
        assert_eq!(app.stack(ids[0]).expect("stack").template().outputs.len(), 1);
    }

    #[test]
    fn deploy_order_follows_dependencies_and_declaration_order() {
        let (mut app, ids) = app_with_stacks(&["Migration", "Network", "Database"]);
        app.add_dependency(ids[0], ids[2]).expect("edge");
        app.add_dependency(ids[2], ids[1]).expect("edge");

        assert_eq!(app.deploy_order().expect("order"), vec![ids[1], ids[2], ids[0]]);
        assert_eq!(app.destroy_order().expect("order"), vec![ids[0], ids[2], ids[1]]);
    }

    #[test]
    fn detects_dependency_cycles() {
        let (mut app, ids) = app_with_stacks(&["A", "B", "C"]);
        app.add_dependency(ids[0], ids[1]).expect("edge");
        app.add_dependency(ids[1], ids[0]).expect("edge");

        let error = app.deploy_order().expect_err("cycle should fail");
        match error {
            SynthError::DependencyCycle(names) => assert_eq!(names, vec!["A", "B"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_self_dependency_and_bad_names() {
        let (mut app, ids) = app_with_stacks(&["A"]);
        assert!(matches!(
            app.add_dependency(ids[0], ids[0]),
            Err(SynthError::SelfDependency(_))
        ));
        assert!(matches!(
            app.add_stack("1stack", Environment::agnostic(), None),
            Err(SynthError::InvalidStackName(_))
        ));
        assert!(matches!(
            app.add_stack("A", Environment::agnostic(), None),
            Err(SynthError::DuplicateStack(_))
        ));
    }

    #[test]
    fn stack_names_follow_cloudformation_rules() {
        let mut app = App::new();
        for name in ["", "1stack", "my_stack", "my.stack", "stack name"] {
            assert!(
                matches!(
                    app.add_stack(name, Environment::agnostic(), None),
                    Err(SynthError::InvalidStackName(_))
                ),
                "{name:?} should be rejected"
            );
        }

        let longest = format!("A{}", "b".repeat(127));
        app.add_stack(&longest, Environment::agnostic(), None)
            .expect("128 characters is allowed");
        let too_long = format!("A{}", "b".repeat(128));
        assert!(matches!(
            app.add_stack(&too_long, Environment::agnostic(), None),
            Err(SynthError::InvalidStackName(_))
        ));
        app.add_stack("App-Stack-2", Environment::agnostic(), None)
            .expect("hyphens and digits are allowed");
    }

    #[test]
    fn agnostic_environment_uses_pseudo_parameters() {
        let env = Environment::agnostic();
        assert_eq!(env.region_value(), json!({"Ref": "AWS::Region"}));
        assert_eq!(env.manifest_string(), "aws://unknown-account/unknown-region");

        let env = Environment::new("123456789012", "eu-west-1");
        assert_eq!(env.region_value(), json!("eu-west-1"));
        assert_eq!(env.manifest_string(), "aws://123456789012/eu-west-1");
    }
}
