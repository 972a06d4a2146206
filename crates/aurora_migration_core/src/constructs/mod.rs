//! Constructs: typed builders that emit CloudFormation resources into a stack.

pub mod custom_resources;
pub mod ec2;
pub mod iam;
pub mod lambda;
pub mod rds;
pub mod secretsmanager;
