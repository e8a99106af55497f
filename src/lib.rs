// ABOUTME: Library root for hearth - the container lifecycle engine.
// ABOUTME: The binary in main.rs wires these modules into the driver and daemon processes.

pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod logs;
pub mod model;
pub mod runner;
pub mod runtime;
pub mod service;
pub mod store;
pub mod template;
pub mod types;
