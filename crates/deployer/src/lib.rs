//! Deployer
//!
//! Starts a set of named units in dependency order. Units whose
//! dependencies have all been deployed start together as one wave; the
//! next wave is chosen each time a deploy completes.
//!
//! # Overview
//!
//! - Units and a global configuration are read from a JSON or YAML deploy
//!   file
//! - Each unit receives the global configuration overridden by its own
//! - Deploys go through a [`DeployAdapter`]: child processes with
//!   [`ProcessAdapter`], in-process units with [`RegistryAdapter`]
//! - The first failed deploy stops the run; nothing is rolled back
//!
//! # Example Deploy File
//!
//! ```json
//! {
//!   "config": { "region": "eu-west", "log": "info" },
//!   "units": {
//!     "db":    { "name": "bin/db" },
//!     "cache": { "name": "bin/cache" },
//!     "api": {
//!       "name": "bin/api",
//!       "dependsOn": ["db", "cache"],
//!       "config": { "log": "debug" },
//!       "ready_after_ms": 200
//!     }
//!   }
//! }
//! ```

pub mod cli;
pub mod config;
pub mod runtime;

pub use cli::DeployArgs;
pub use config::{
    load_configuration, merge, ConfigLoadError, ConfigLocator, ConfigMap, ConfigSource,
    DeployFile, DeployFileError, UnitSpec,
};
pub use runtime::{
    DependencyError, DependencyGraph, DeployAdapter, DeployError, DeployPlan, DeployRequest,
    InstanceId, ManagedProcess, ProcessAdapter, ProcessConfig, ProcessError, ProcessEvent,
    ProcessStatus, RegistryAdapter, SchedulerConfig, SchedulerError, UnitContext, UnitFactory,
    UnsatisfiedPolicy, WaveScheduler,
};
