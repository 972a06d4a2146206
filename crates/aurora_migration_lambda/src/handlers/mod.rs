pub mod framework;
pub mod on_event;
