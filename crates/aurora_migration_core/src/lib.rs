//! Declarative infrastructure for the Aurora demo application.
//!
//! This crate owns the CloudFormation template model, the constructs built on
//! top of it, the three stack definitions and cloud-assembly synthesis. It also
//! owns the custom-resource wire contract shared with the Lambda handlers.
//! AWS SDK and Lambda runtime concerns live in `aurora_migration_lambda`.

pub mod assembly;
pub mod config;
pub mod constructs;
pub mod contract;
pub mod error;
pub mod stacks;
pub mod synth;
pub mod template;

pub use assembly::{App, Environment, Reference, StackId};
pub use config::DeploymentConfig;
pub use error::{ConfigError, SynthError};
pub use stacks::{build_application, synth_application, Application};
pub use synth::{asset_hash, CloudAssembly};
