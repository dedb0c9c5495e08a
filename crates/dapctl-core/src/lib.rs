//! dapctl-core: platform paths and log file helpers shared by the
//! dapctl crates.
pub mod logging;
pub mod paths;

pub use paths::{DefaultPaths, Paths};
