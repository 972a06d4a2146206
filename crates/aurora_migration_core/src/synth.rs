//! Cloud assembly synthesis: `manifest.json`, one template per stack and one
//! asset manifest per stack that ships file assets.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::assembly::{App, FileAsset};
use crate::constructs::lambda::ASSET_BUCKET;
use crate::error::SynthError;
use crate::template::Template;

pub const CLOUD_ASSEMBLY_VERSION: &str = "36.0.0";
pub const MANIFEST_FILE: &str = "manifest.json";

const STACK_ARTIFACT_TYPE: &str = "aws:cloudformation:stack";
const ASSET_MANIFEST_ARTIFACT_TYPE: &str = "cdk:asset-manifest";
const CURRENT_DESTINATION: &str = "current_account-current_region";

/// Lowercase hex SHA-256 of an asset's bytes.
pub fn asset_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub artifact_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    pub properties: serde_json::Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// Artifacts keyed by id, kept in deploy order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Artifacts(pub Vec<(String, Artifact)>);

impl Artifacts {
    pub fn get(&self, id: &str) -> Option<&Artifact> {
        self.0
            .iter()
            .find(|(artifact_id, _)| artifact_id == id)
            .map(|(_, artifact)| artifact)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(id, _)| id.as_str())
    }
}

impl Serialize for Artifacts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, artifact) in &self.0 {
            map.serialize_entry(id, artifact)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub version: String,
    pub artifacts: Artifacts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetSource {
    pub path: String,
    pub packaging: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDestination {
    pub bucket_name: String,
    pub object_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileAssetEntry {
    pub source: AssetSource,
    pub destinations: BTreeMap<String, AssetDestination>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetManifest {
    pub version: String,
    pub files: BTreeMap<String, FileAssetEntry>,
    pub docker_images: BTreeMap<String, serde_json::Value>,
}

impl AssetManifest {
    fn from_assets<'a>(assets: impl Iterator<Item = &'a FileAsset>) -> Self {
        let files = assets
            .map(|asset| {
                let entry = FileAssetEntry {
                    source: AssetSource {
                        path: asset.path.display().to_string(),
                        packaging: "file".to_string(),
                    },
                    destinations: BTreeMap::from([(
                        CURRENT_DESTINATION.to_string(),
                        AssetDestination {
                            bucket_name: ASSET_BUCKET.to_string(),
                            object_key: format!("{}.zip", asset.hash),
                        },
                    )]),
                };
                (asset.hash.clone(), entry)
            })
            .collect();
        Self {
            version: CLOUD_ASSEMBLY_VERSION.to_string(),
            files,
            docker_images: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StackArtifact {
    pub stack_name: String,
    pub template_file: String,
    pub template: Template,
    pub asset_manifest: Option<(String, AssetManifest)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CloudAssembly {
    pub manifest: Manifest,
    pub stacks: Vec<StackArtifact>,
}

impl CloudAssembly {
    pub fn stack(&self, name: &str) -> Option<&StackArtifact> {
        self.stacks.iter().find(|stack| stack.stack_name == name)
    }

    pub fn template(&self, name: &str) -> Option<&Template> {
        self.stack(name).map(|stack| &stack.template)
    }

    /// Writes every file of the assembly into `dir`, creating it when needed,
    /// and returns the written paths.
    pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, SynthError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|source| SynthError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::new();
        written.push(write_json(dir, MANIFEST_FILE, &self.manifest)?);
        for stack in &self.stacks {
            written.push(write_json(dir, &stack.template_file, &stack.template)?);
            if let Some((file, manifest)) = &stack.asset_manifest {
                written.push(write_json(dir, file, manifest)?);
            }
        }
        Ok(written)
    }
}

fn write_json<T: Serialize>(dir: &Path, file: &str, value: &T) -> Result<PathBuf, SynthError> {
    let path = dir.join(file);
    let mut contents = serde_json::to_string_pretty(value)?;
    contents.push('\n');
    fs::write(&path, contents).map_err(|source| SynthError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

impl App {
    /// Renders the app as a cloud assembly. Fails on dependency cycles.
    pub fn synth(&self) -> Result<CloudAssembly, SynthError> {
        let order = self.deploy_order()?;
        let mut artifacts = Vec::new();
        let mut stacks = Vec::new();

        for id in order {
            let stack = self.stack(id)?;
            let mut dependencies = Vec::new();
            for dependency in self.dependencies_of(id)? {
                dependencies.push(self.stack(dependency)?.name().to_string());
            }

            let asset_manifest = if stack.assets().next().is_some() {
                let artifact_id = format!("{}.assets", stack.name());
                let file = stack.assets_file_name();
                artifacts.push((
                    artifact_id.clone(),
                    Artifact {
                        artifact_type: ASSET_MANIFEST_ARTIFACT_TYPE.to_string(),
                        environment: None,
                        properties: serde_json::json!({ "file": file }),
                        dependencies: Vec::new(),
                    },
                ));
                dependencies.push(artifact_id);
                Some((file, AssetManifest::from_assets(stack.assets())))
            } else {
                None
            };

            let template_file = stack.template_file_name();
            artifacts.push((
                stack.name().to_string(),
                Artifact {
                    artifact_type: STACK_ARTIFACT_TYPE.to_string(),
                    environment: Some(stack.environment().manifest_string()),
                    properties: serde_json::json!({
                        "templateFile": template_file,
                        "stackName": stack.name(),
                    }),
                    dependencies,
                },
            ));
            stacks.push(StackArtifact {
                stack_name: stack.name().to_string(),
                template_file,
                template: stack.template().clone(),
                asset_manifest,
            });
        }

        Ok(CloudAssembly {
            manifest: Manifest {
                version: CLOUD_ASSEMBLY_VERSION.to_string(),
                artifacts: Artifacts(artifacts),
            },
            stacks,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::assembly::Environment;
    use crate::template::Resource;

    use super::*;

    #[test]
    fn asset_hash_is_lowercase_sha256() {
        assert_eq!(
            asset_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn manifest_lists_stacks_in_deploy_order() {
        let mut app = App::new();
        let consumer = app
            .add_stack("Consumer", Environment::new("111111111111", "eu-west-1"), None)
            .expect("consumer");
        let producer = app
            .add_stack("Producer", Environment::agnostic(), None)
            .expect("producer");
        app.add_resource(producer, "Queue", Resource::new("AWS::SQS::Queue"))
            .expect("queue");
        app.add_dependency(consumer, producer).expect("dependency");

        let assembly = app.synth().expect("synth");
        let ids: Vec<&str> = assembly.manifest.artifacts.ids().collect();
        assert_eq!(ids, vec!["Producer", "Consumer"]);

        let consumer_artifact = assembly.manifest.artifacts.get("Consumer").expect("artifact");
        assert_eq!(consumer_artifact.environment.as_deref(), Some("aws://111111111111/eu-west-1"));
        assert_eq!(consumer_artifact.dependencies, vec!["Producer"]);
        assert_eq!(
            assembly.manifest.artifacts.get("Producer").and_then(|a| a.environment.clone()),
            Some("aws://unknown-account/unknown-region".to_string())
        );
        assert!(assembly.stack("Producer").expect("stack").asset_manifest.is_none());
    }

    #[test]
    fn stacks_with_assets_get_an_asset_manifest() {
        let mut app = App::new();
        let stack = app
            .add_stack("Functions", Environment::agnostic(), None)
            .expect("stack");
        let hash = asset_hash(b"bootstrap");
        app.add_asset(
            stack,
            FileAsset {
                hash: hash.clone(),
                path: PathBuf::from("dist/handler.zip"),
            },
        )
        .expect("asset");

        let assembly = app.synth().expect("synth");
        let (file, manifest) = assembly
            .stack("Functions")
            .and_then(|s| s.asset_manifest.as_ref())
            .expect("asset manifest");
        assert_eq!(file, "Functions.assets.json");
        let destination = &manifest.files[&hash].destinations[CURRENT_DESTINATION];
        assert_eq!(destination.object_key, format!("{hash}.zip"));
        assert_eq!(destination.bucket_name, ASSET_BUCKET);

        let stack_artifact = assembly.manifest.artifacts.get("Functions").expect("artifact");
        assert_eq!(stack_artifact.dependencies, vec!["Functions.assets"]);
    }
}
