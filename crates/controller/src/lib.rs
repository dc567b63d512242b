//! Meshplane controller
//!
//! Derives WireGuard interfaces, peerings, routes and firewall rules for
//! every router from declared mesh membership, and submits the result to a
//! deployment job runner.

pub mod config;
pub mod firewalld;
pub mod ifaces;
pub mod jobs;
pub mod mesh;
pub mod peers;
pub mod realize;
pub mod routers;
pub mod routes;
pub mod rules;
pub mod state;
pub mod wgconf;

pub use config::ControllerConfig;
pub use jobs::{DeploymentJob, HttpJobRunner, JobHandle, JobRunner, SpoolJobRunner};
pub use routers::{CreateRouter, UpdateRouter};
pub use state::StateManager;
