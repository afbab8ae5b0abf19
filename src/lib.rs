#![forbid(unsafe_code)]
//! Front-end asset pipeline runner.
//!
//! A project is described by a [`Config`] (conventional defaults, optionally
//! overridden by `tsumiki.toml`). The [`Pipeline`] turns it into a graph of
//! named tasks: leaves which compile stylesheets, bundle scripts, render
//! templates, serve the site or watch for changes, and composites which run
//! their children in sequence or in parallel. A [`Scheduler`] executes the
//! graph and returns a [`Report`] of every task that ran.
//!
//! ```rust,ignore
//! let config = Config::load_cwd()?;
//! let pipeline = Pipeline::new(&config)?;
//! let report = pipeline.run(Environment::new(config), Command::Build)?;
//! ```

pub mod compile;
pub mod config;
mod core;
mod engine;
mod error;
mod io;
pub mod notice;
pub mod package;
mod pipeline;
pub mod reload;

pub use crate::config::Config;
pub use crate::core::{Context, Environment, Mode};
pub use crate::engine::runner::watch::WatchBinding;
pub use crate::engine::runner::{Execution, Outcome, Report, Scheduler};
pub use crate::engine::{Done, Kind, Registry, TaskGraph, TaskId};
pub use crate::error::*;
pub use crate::io::as_overhead;
pub use crate::notice::{Category, ConsoleNotifier, Notice, Notifier};
pub use crate::pipeline::{Command, Pipeline};
pub use crate::reload::Reloader;
