// Infrastructure layer: configuration, logging and in-process collaborators

pub mod config;
pub mod logging;
pub mod memory;

pub use config::{AppConfig, ConfigError, SolverSettings};
pub use memory::{
    InMemoryAuditLog, InMemoryJobStore, InMemoryResultStore, InMemoryScenarioStore,
    StaticLocationLookup,
};
