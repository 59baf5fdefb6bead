//! Change tracking across runs.
//!
//! This module provides functionality for:
//! - Comparing a fresh status snapshot against the last one seen
//! - Persisting snapshots between runs
//! - Driving one check over every tracked application

pub mod diff;
pub mod history;
pub mod run;

pub use diff::ChangeEvent;
pub use history::HistoryStore;
pub use run::{run, FailureReason, RetryPolicy, RunContext, RunReport, RunSummary};
