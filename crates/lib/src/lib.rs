//! stagebuild-lib: a staged, cache-aware build pipeline.
//!
//! A run fetches each stage's archive into the cache, materializes it into a
//! build tree, and runs the stage's commands there, one stage after another:
//! - `Stage`: a resource URL and the commands that build it
//! - `BuildContext`: prefix, cache root, and extra search paths for a run
//! - `Pipeline`: the background worker, controlled through a `PipelineHandle`
//! - `ControlSignal`: cooperative cancel and pause shared with the worker

pub mod cache;
pub mod config;
pub mod consts;
pub mod control;
pub mod extract;
pub mod fetch;
pub mod paths;
pub mod pipeline;
pub mod placeholder;
pub mod process;
pub mod shell;
pub mod stage;
pub mod uninstall;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use control::ControlSignal;
pub use pipeline::{Pipeline, PipelineHandle, PipelineOutcome, PipelineState, SetupMode};
pub use stage::{BuildContext, Stage};
