// === MODULE DEFINITION ===
pub mod module;
pub use module::GreeterModule;

pub mod config;
pub mod service;
