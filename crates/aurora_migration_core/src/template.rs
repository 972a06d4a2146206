//! CloudFormation template model and intrinsic functions.
//!
//! Properties stay as `serde_json::Value` so constructs can pass provider
//! configuration through unchanged. Maps are ordered so synthesized templates
//! are byte-for-byte reproducible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::SynthError;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

pub const AWS_ACCOUNT_ID: &str = "AWS::AccountId";
pub const AWS_REGION: &str = "AWS::Region";
pub const AWS_PARTITION: &str = "AWS::Partition";
pub const AWS_URL_SUFFIX: &str = "AWS::URLSuffix";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemovalPolicy {
    Delete,
    Retain,
    Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(rename = "Properties", default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(
        rename = "DeletionPolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub deletion_policy: Option<RemovalPolicy>,
    #[serde(
        rename = "UpdateReplacePolicy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub update_replace_policy: Option<RemovalPolicy>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    pub fn property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        let logical_id = logical_id.into();
        if let Err(position) = self.depends_on.binary_search(&logical_id) {
            self.depends_on.insert(position, logical_id);
        }
        self
    }

    /// Sets both the deletion and the update-replace policy.
    pub fn removal_policy(mut self, policy: RemovalPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self.update_replace_policy = Some(policy);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Export {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Output {
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(
        rename = "Description",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
    #[serde(rename = "Export", default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(
        rename = "Description",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<String>,
    #[serde(rename = "Resources", default)]
    pub resources: BTreeMap<String, Resource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: None,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }
}

impl Template {
    pub fn add_resource(
        &mut self,
        stack_name: &str,
        logical_id: &str,
        resource: Resource,
    ) -> Result<(), SynthError> {
        validate_logical_id(logical_id)?;
        if self.resources.contains_key(logical_id) {
            return Err(SynthError::DuplicateLogicalId {
                stack: stack_name.to_string(),
                logical_id: logical_id.to_string(),
            });
        }
        self.resources.insert(logical_id.to_string(), resource);
        Ok(())
    }

    pub fn add_output(
        &mut self,
        stack_name: &str,
        logical_id: &str,
        output: Output,
    ) -> Result<(), SynthError> {
        validate_logical_id(logical_id)?;
        match self.outputs.get(logical_id) {
            Some(existing) if *existing == output => Ok(()),
            Some(_) => Err(SynthError::DuplicateLogicalId {
                stack: stack_name.to_string(),
                logical_id: logical_id.to_string(),
            }),
            None => {
                self.outputs.insert(logical_id.to_string(), output);
                Ok(())
            }
        }
    }

    pub fn resource_mut(&mut self, logical_id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(logical_id)
    }

    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &str,
    ) -> impl Iterator<Item = (&'a String, &'a Resource)> + 'a {
        let resource_type = resource_type.to_string();
        self.resources
            .iter()
            .filter(move |(_, resource)| resource.resource_type == resource_type)
    }
}

fn validate_logical_id(logical_id: &str) -> Result<(), SynthError> {
    if logical_id.is_empty() || !logical_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SynthError::InvalidLogicalId(logical_id.to_string()));
    }
    Ok(())
}

/// Joins path segments into a CloudFormation logical id.
pub fn logical_id<S: AsRef<str>>(parts: &[S]) -> String {
    parts
        .iter()
        .flat_map(|part| part.as_ref().chars())
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

pub fn ref_(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn join(separator: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [separator, parts] })
}

/// Like `join("", parts)`, but folds to a plain string when every part is
/// already a literal.
pub fn concat(parts: Vec<Value>) -> Value {
    if parts.iter().all(Value::is_string) {
        let joined: String = parts.iter().filter_map(Value::as_str).collect();
        return Value::String(joined);
    }
    join("", parts)
}

pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index, list] })
}

pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

pub fn import_value(export_name: &str) -> Value {
    json!({ "Fn::ImportValue": export_name })
}

pub fn pseudo(name: &str) -> Value {
    ref_(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_logical_ids() {
        let mut template = Template::default();
        template
            .add_resource("Stack", "Bucket", Resource::new("AWS::S3::Bucket"))
            .expect("first insert should pass");

        let error = template
            .add_resource("Stack", "Bucket", Resource::new("AWS::S3::Bucket"))
            .expect_err("duplicate should fail");
        assert!(matches!(error, SynthError::DuplicateLogicalId { .. }));
    }

    #[test]
    fn rejects_non_alphanumeric_logical_ids() {
        let mut template = Template::default();
        let error = template
            .add_resource("Stack", "My-Bucket", Resource::new("AWS::S3::Bucket"))
            .expect_err("hyphen should fail");
        assert!(matches!(error, SynthError::InvalidLogicalId(id) if id == "My-Bucket"));
    }

    #[test]
    fn identical_outputs_are_idempotent() {
        let mut template = Template::default();
        let output = Output {
            value: ref_("Bucket"),
            description: None,
            export: Some(Export {
                name: "Stack:Bucket".to_string(),
            }),
        };
        template
            .add_output("Stack", "BucketOut", output.clone())
            .expect("first output should pass");
        template
            .add_output("Stack", "BucketOut", output)
            .expect("same output should be accepted again");
        assert_eq!(template.outputs.len(), 1);
    }

    #[test]
    fn depends_on_is_sorted_and_unique() {
        let resource = Resource::new("AWS::Lambda::Function")
            .depends_on("RoleB")
            .depends_on("RoleA")
            .depends_on("RoleB");
        assert_eq!(resource.depends_on, vec!["RoleA", "RoleB"]);
    }

    #[test]
    fn serializes_with_cloudformation_keys() {
        let mut template = Template::default();
        template
            .add_resource(
                "Stack",
                "Secret",
                Resource::new("AWS::SecretsManager::Secret")
                    .property("Name", "/demo")
                    .removal_policy(RemovalPolicy::Delete),
            )
            .expect("insert should pass");

        let value = serde_json::to_value(&template).expect("template should serialize");
        assert_eq!(value["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(value["Resources"]["Secret"]["Type"], "AWS::SecretsManager::Secret");
        assert_eq!(value["Resources"]["Secret"]["DeletionPolicy"], "Delete");
        assert!(value["Resources"]["Secret"].get("DependsOn").is_none());
        assert!(value.get("Outputs").is_none());
    }

    #[test]
    fn concat_folds_literals_only() {
        assert_eq!(
            concat(vec![Value::from("arn:"), Value::from("aws")]),
            Value::from("arn:aws")
        );
        assert_eq!(
            concat(vec![Value::from("arn:"), pseudo(AWS_PARTITION)]),
            json!({"Fn::Join": ["", ["arn:", {"Ref": "AWS::Partition"}]]})
        );
    }

    #[test]
    fn logical_id_strips_separators() {
        assert_eq!(
            logical_id(&["DemoVpc", "Public-Subnet/1", "Subnet"]),
            "DemoVpcPublicSubnet1Subnet"
        );
    }
}
