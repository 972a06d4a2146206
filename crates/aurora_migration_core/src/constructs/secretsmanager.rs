use serde_json::{json, Value};

use crate::assembly::{App, Reference, StackId};
use crate::constructs::iam::{PolicyStatement, Role};
use crate::error::SynthError;
use crate::template::{join, logical_id, RemovalPolicy, Resource};

/// Characters RDS refuses in master passwords.
pub const RDS_EXCLUDE_CHARACTERS: &str = " %+~`#$&*()|[]{}:;<>?!'/@\"\\";
const GENERATED_PASSWORD_LENGTH: u32 = 30;

pub const SECRET_READ_ACTIONS: [&str; 2] = [
    "secretsmanager:GetSecretValue",
    "secretsmanager:DescribeSecret",
];

/// Username plus the fixed name of the secret that will hold the generated
/// password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    secret_name: String,
}

impl Credentials {
    pub fn from_generated_secret(username: impl Into<String>, secret_name: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret_name: secret_name.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSecret {
    id: String,
    secret: Reference,
    secret_name: String,
}

impl DatabaseSecret {
    pub fn new(
        app: &mut App,
        stack: StackId,
        id: &str,
        credentials: &Credentials,
    ) -> Result<Self, SynthError> {
        let stack_name = app.stack(stack)?.name().to_string();
        let username_template = json!({ "username": credentials.username() }).to_string();

        let secret = app.add_resource(
            stack,
            id,
            Resource::new("AWS::SecretsManager::Secret")
                .property("Description", format!("Generated database credentials for stack: {stack_name}"))
                .property(
                    "GenerateSecretString",
                    json!({
                        "ExcludeCharacters": RDS_EXCLUDE_CHARACTERS,
                        "GenerateStringKey": "password",
                        "PasswordLength": GENERATED_PASSWORD_LENGTH,
                        "SecretStringTemplate": username_template,
                    }),
                )
                .property("Name", credentials.secret_name())
                .removal_policy(RemovalPolicy::Delete),
        )?;

        Ok(Self {
            id: id.to_string(),
            secret,
            secret_name: credentials.secret_name().to_string(),
        })
    }

    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    pub fn stack(&self) -> StackId {
        self.secret.stack()
    }

    /// `Ref` of a secret is its ARN.
    pub fn secret_arn(&self) -> &Reference {
        &self.secret
    }

    /// `{{resolve:secretsmanager:...}}` dynamic reference to one JSON field.
    pub fn dynamic_reference(
        &self,
        app: &mut App,
        consumer: StackId,
        field: &str,
    ) -> Result<Value, SynthError> {
        let arn = app.resolve(consumer, &self.secret)?;
        Ok(join(
            "",
            vec![
                Value::from("{{resolve:secretsmanager:"),
                arn,
                Value::from(format!(":SecretString:{field}::}}}}")),
            ],
        ))
    }

    /// Lets the cluster rotate connection details into the secret.
    pub fn attach_to_cluster(&self, app: &mut App, cluster: &Reference) -> Result<Reference, SynthError> {
        let stack = self.stack();
        let secret_id = app.resolve(stack, &self.secret)?;
        let target_id = app.resolve(stack, cluster)?;
        let attachment_id = logical_id(&[self.id.as_str(), "Attachment"]);
        app.add_resource(
            stack,
            &attachment_id,
            Resource::new("AWS::SecretsManager::SecretTargetAttachment")
                .property("SecretId", secret_id)
                .property("TargetId", target_id)
                .property("TargetType", "AWS::RDS::DBCluster"),
        )
    }

    pub fn grant_read(&self, app: &mut App, role: &mut Role) -> Result<(), SynthError> {
        let arn = app.resolve(role.stack(), &self.secret)?;
        role.add_to_policy(
            app,
            PolicyStatement::allow()
                .add_actions(&SECRET_READ_ACTIONS)
                .add_resource(arn),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::assembly::Environment;
    use crate::constructs::iam::{RoleProps, ServicePrincipal};

    use super::*;

    #[test]
    fn generated_secret_templates_the_username() {
        let mut app = App::new();
        let stack = app
            .add_stack("Database", Environment::agnostic(), None)
            .expect("stack");
        let credentials = Credentials::from_generated_secret("clusteradmin", "/aurora/databaseSecrets");
        DatabaseSecret::new(&mut app, stack, "DemoClusterSecret", &credentials).expect("secret");

        let template = app.stack(stack).expect("stack").template();
        let secret = &template.resources["DemoClusterSecret"];
        assert_eq!(secret.properties["Name"], "/aurora/databaseSecrets");
        assert_eq!(
            secret.properties["GenerateSecretString"]["SecretStringTemplate"],
            "{\"username\":\"clusteradmin\"}"
        );
        assert_eq!(secret.properties["GenerateSecretString"]["PasswordLength"], 30);
    }

    #[test]
    fn dynamic_reference_targets_one_field() {
        let mut app = App::new();
        let stack = app
            .add_stack("Database", Environment::agnostic(), None)
            .expect("stack");
        let credentials = Credentials::from_generated_secret("admin", "/db");
        let secret = DatabaseSecret::new(&mut app, stack, "Secret", &credentials).expect("secret");

        let value = secret
            .dynamic_reference(&mut app, stack, "password")
            .expect("reference");
        assert_eq!(
            value,
            json!({"Fn::Join": ["", [
                "{{resolve:secretsmanager:",
                {"Ref": "Secret"},
                ":SecretString:password::}}"
            ]]})
        );
    }

    #[test]
    fn grant_read_from_another_stack_imports_the_arn() {
        let mut app = App::new();
        let database = app
            .add_stack("Database", Environment::agnostic(), None)
            .expect("stack");
        let migration = app
            .add_stack("Migration", Environment::agnostic(), None)
            .expect("stack");
        let credentials = Credentials::from_generated_secret("admin", "/db");
        let secret = DatabaseSecret::new(&mut app, database, "Secret", &credentials).expect("secret");
        let mut role = Role::new(
            &mut app,
            migration,
            "FnRole",
            RoleProps {
                assumed_by: ServicePrincipal::lambda(),
                inline_policies: BTreeMap::new(),
                managed_policies: Vec::new(),
            },
        )
        .expect("role");

        secret.grant_read(&mut app, &mut role).expect("grant");

        let template = app.stack(migration).expect("stack").template();
        let statement = &template.resources["FnRoleDefaultPolicy"].properties["PolicyDocument"]
            ["Statement"][0];
        assert_eq!(
            statement["Action"],
            json!(["secretsmanager:GetSecretValue", "secretsmanager:DescribeSecret"])
        );
        assert_eq!(
            statement["Resource"],
            json!({"Fn::ImportValue": "Database:ExportsOutputRefSecret"})
        );
        assert_eq!(app.dependencies_of(migration).expect("deps"), vec![database]);
    }
}
