//! Lambda side of the migration trigger.
//!
//! `handlers::on_event` runs the schema migrations for create and update
//! events. `handlers::framework` is the provider framework that sits between
//! CloudFormation and that handler. AWS clients and the database live behind
//! the traits in `adapters` so both handlers run in unit tests.

pub mod adapters;
pub mod handlers;
pub mod logging;
