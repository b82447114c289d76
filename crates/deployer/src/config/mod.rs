//! Deploy file parsing, discovery and configuration merging

mod deploy_file;
mod loader;
mod merge;

pub use deploy_file::*;
pub use loader::*;
pub use merge::merge;
