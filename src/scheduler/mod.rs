//! Declarative job scheduling.
//!
//! Config job objects are validated into [`JobSpec`]s, their triggers are
//! compiled into recurrence rules, and a [`Scheduler`] loop fires them
//! through a [`crate::runner::Runner`].

pub mod compile;
pub mod controller;
pub mod cron_fields;
pub mod jobs;
pub mod trigger;

pub use compile::{compile, CompiledTrigger, Recurrence};
pub use controller::{JobRunRecord, RunOutcome, Scheduler, SchedulerController};
pub use jobs::{make_job_spec, EmailRouting, JobDefaults, JobSpec};
pub use trigger::{TriggerError, TriggerSpec};
