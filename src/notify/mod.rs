//! Reporting run results to the user.

pub mod console;

pub use console::ConsoleSink;

use crate::portal::{Application, StatusRecord};
use crate::tracker::{ChangeEvent, FailureReason, RunSummary};

/// Receives per-application results as a run progresses.
pub trait NotificationSink {
    /// A status was fetched. `changes` is set only when something differs from the last run.
    fn application_checked(
        &mut self,
        application: &Application,
        record: &StatusRecord,
        changes: Option<&ChangeEvent>,
    );

    fn application_failed(&mut self, application: &Application, reason: &FailureReason);

    fn run_finished(&mut self, summary: &RunSummary);
}
