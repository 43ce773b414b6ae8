//! Swarm - Git-native coordination runtime for fleets of AI coding agents

pub mod commands;
pub mod config;
pub mod error;
pub mod monitor;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod statusdoc;
pub mod store;
pub mod subprocess;
pub mod telemetry;
