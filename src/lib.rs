//! Cadence: a personal automation host.
//!
//! Jobs are declared in a config file, each naming a module, its kwargs and a
//! trigger. The host compiles every trigger into a recurrence rule, fires jobs
//! on a bounded worker pool, and emails whatever HTML a module produces.
//!
//! # Architecture
//!
//! - **Trigger compiler** (`scheduler::trigger`, `scheduler::compile`): cron,
//!   interval, date and daily-time triggers to [`scheduler::CompiledTrigger`]
//! - **Job registrar** (`scheduler::jobs`): raw job objects to [`scheduler::JobSpec`]
//! - **Scheduler controller** (`scheduler::controller`): the firing loop
//! - **Runner** ([`runner`]): kwargs normalization, timeouts, output coercion, email
//! - **Modules** ([`modules`]): `career_watch` (backed by `cadence-watch`) and
//!   `example_daily`

pub mod activity;
pub mod config;
pub mod emailer;
pub mod error;
pub mod host;
pub mod modules;
pub mod runner;
pub mod scheduler;

pub use config::HostConfig;
pub use error::{CadenceError, Result};
pub use host::Host;
pub use runner::{ModuleRunner, RunReport, RunRequest, Runner};
pub use scheduler::{Scheduler, SchedulerController};
