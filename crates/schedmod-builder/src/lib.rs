pub mod app;
pub mod config;
pub mod error;
pub mod executor;
pub mod fsops;
pub mod kernel;
pub mod log_sanitize;
pub mod manifest;
pub mod modules;
pub mod package;
pub mod pipeline;
pub mod planner;
pub mod profile;
pub mod sandbox;
pub mod state;
pub mod toolroot;

pub use error::{Error, ErrorKind, Result};
