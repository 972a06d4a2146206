pub mod invoke;
pub mod migrator;
pub mod response;
pub mod secrets;
