#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod core;
mod engine;
mod error;
mod pipeline;
pub mod task;
mod utils;

pub use crate::config::{CONFIG_FILE, Config, Targets};
pub use crate::core::{Environment, Mode};
pub use crate::engine::{
    Dependencies, Diagnostics, Handle, Plan, Reload, StepContext, StepDef, StepExecution,
};
pub use crate::error::*;
pub use crate::pipeline::Pipeline;
pub use crate::task::revision::{MANIFEST_FILE, Manifest};
pub use crate::task::{Emitted, Variant};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
