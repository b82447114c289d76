//! Runtime components: scheduling, deploy adapters and planning

pub mod adapter;
pub mod dependency;
pub mod plan;
pub mod process;
pub mod scheduler;

pub use adapter::*;
pub use dependency::*;
pub use plan::*;
pub use process::*;
pub use scheduler::*;
