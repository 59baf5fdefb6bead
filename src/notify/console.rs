//! Plain-text report written to stdout.

use std::fmt;
use std::io::{self, Write};

use tracing::warn;

use super::NotificationSink;
use crate::portal::models::ProgramStatus;
use crate::portal::{Application, StatusRecord};
use crate::tracker::{ChangeEvent, FailureReason, RunSummary};

const RULE_WIDTH: usize = 70;

/// Writes a full status report per school, with a banner when something changed.
pub struct ConsoleSink<W: Write> {
    out: W,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[allow(dead_code)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, text: impl fmt::Display) {
        let result = write!(self.out, "{}", text).and_then(|_| self.out.flush());
        if let Err(e) = result {
            warn!("Failed to write report: {}", e);
        }
    }
}

impl<W: Write> NotificationSink for ConsoleSink<W> {
    fn application_checked(
        &mut self,
        application: &Application,
        record: &StatusRecord,
        changes: Option<&ChangeEvent>,
    ) {
        if let Some(event) = changes {
            self.emit(ChangeBanner {
                application,
                event,
            });
        }
        self.emit(StatusView {
            application,
            record,
        });
    }

    fn application_failed(&mut self, application: &Application, reason: &FailureReason) {
        self.emit(format_args!("FAILED {}: {}\n\n", application.name, reason));
    }

    fn run_finished(&mut self, summary: &RunSummary) {
        self.emit(SummaryView(summary));
    }
}

struct StatusView<'a> {
    application: &'a Application,
    record: &'a StatusRecord,
}

impl fmt::Display for StatusView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(f, "{rule}")?;
        writeln!(f, "{}", self.application.name)?;
        writeln!(f, "{rule}")?;

        let applicant = &self.record.applicant;
        let full_name = applicant.full_name();
        if !full_name.is_empty() {
            writeln!(f, "Applicant: {}", full_name)?;
        }
        if !applicant.email.is_empty() {
            writeln!(f, "Email: {}", applicant.email)?;
        }
        if !applicant.lsac_account.is_empty() {
            writeln!(f, "LSAC Account: {}", applicant.lsac_account)?;
        }
        let transcript = if applicant.final_transcript_received {
            "received"
        } else {
            "not yet received"
        };
        writeln!(f, "Final Transcript: {}", transcript)?;

        if self.record.programs.is_empty() {
            writeln!(f, "No programs listed.")?;
        }
        for program in &self.record.programs {
            writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
            write_program(f, program)?;
        }
        writeln!(f)
    }
}

fn write_program(f: &mut fmt::Formatter<'_>, program: &ProgramStatus) -> fmt::Result {
    writeln!(f, "Program: {}", program.title)?;
    writeln!(f, "Status: {}", program.status)?;

    if let Some(message) = &program.message {
        writeln!(f, "Message:")?;
        for line in message.lines() {
            writeln!(f, "   {}", line)?;
        }
    }

    if !program.checklist.is_empty() {
        writeln!(
            f,
            "Checklist ({}/{} complete):",
            program.checklist_completed(),
            program.checklist.len()
        )?;
        for (item, done) in &program.checklist {
            writeln!(f, "  [{}] {}", if *done { "x" } else { " " }, item)?;
        }
    }

    if !program.letters.is_empty() {
        writeln!(
            f,
            "Letters of Recommendation: {} submitted",
            program.letters.len()
        )?;
        for letter in &program.letters {
            let signed = if letter.signed { "signed" } else { "not signed" };
            writeln!(f, "  - {} - {} ({})", letter.name, letter.date, signed)?;
        }
    }

    if let Some(fee) = &program.fee {
        let waived = if fee.waived { " (waived)" } else { "" };
        writeln!(f, "Application Fee: {}{}", fee.description, waived)?;
    }

    if let Some(scholarship) = &program.scholarship {
        writeln!(f, "Scholarship: {}", scholarship.name)?;
        if scholarship.amount > 0.0 {
            writeln!(f, "   Amount: {}", format_amount(scholarship.amount))?;
        }
    }

    Ok(())
}

struct ChangeBanner<'a> {
    application: &'a Application,
    event: &'a ChangeEvent,
}

impl fmt::Display for ChangeBanner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "!!! CHANGES DETECTED: {} !!!",
            self.application.name.to_uppercase()
        )?;
        for change in &self.event.changes {
            let marker = if change.kind.is_newly_completed() {
                '+'
            } else {
                '*'
            };
            writeln!(f, "  {} {}", marker, change)?;
        }
        writeln!(f)
    }
}

struct SummaryView<'a>(&'a RunSummary);

impl fmt::Display for SummaryView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.0;
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;
        writeln!(f, "{}", summary.headline())?;
        writeln!(
            f,
            "Checked {} school(s): {} changed, {} new, {} failed",
            summary.checked,
            summary.changed.len(),
            summary.baseline,
            summary.failures.len()
        )?;
        if !summary.changed.is_empty() {
            writeln!(f, "  Changed: {}", summary.changed.join(", "))?;
        }
        for (name, reason) in &summary.failures {
            writeln!(f, "  Failed: {} - {}", name, reason)?;
        }
        Ok(())
    }
}

/// Dollar amount with thousands separators, e.g. `$15,000.00`.
pub fn format_amount(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}
