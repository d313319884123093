//! Status output: one line per file on stdout, text or JSON.

use crate::models::outcome::{FileReport, Outcome, RunSummary};
use serde_json::json;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Json,
}

/// Human phrasing of an outcome.
pub fn describe(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Skipped => "already exists".into(),
        Outcome::Created => "created".into(),
        Outcome::Overwritten => "exists with changes".into(),
        Outcome::Failed { reason, .. } => format!("failed: {}", reason),
    }
}

pub fn write_report<W: Write>(out: &mut W, format: ReportFormat, report: &FileReport) -> io::Result<()> {
    match format {
        ReportFormat::Text => {
            let suffix = if report.dry_run && report.outcome.is_transfer() {
                " (dry run)"
            } else {
                ""
            };
            writeln!(
                out,
                "{} {}{}",
                report.path.display(),
                describe(&report.outcome),
                suffix
            )
        }
        ReportFormat::Json => {
            serde_json::to_writer(&mut *out, report)?;
            writeln!(out)
        }
    }
}

pub fn write_summary<W: Write>(out: &mut W, format: ReportFormat, summary: &RunSummary) -> io::Result<()> {
    match format {
        ReportFormat::Text => {
            let mut line = format!(
                "{} skipped, {} created, {} overwritten, {} failed",
                summary.skipped(),
                summary.created(),
                summary.overwritten(),
                summary.failed()
            );
            if summary.cancelled {
                line.push_str(" (cancelled)");
            } else if summary.halted {
                line.push_str(" (halted after backend failure)");
            }
            writeln!(out, "{}", line)
        }
        ReportFormat::Json => {
            let body = json!({
                "summary": {
                    "skipped": summary.skipped(),
                    "created": summary.created(),
                    "overwritten": summary.overwritten(),
                    "failed": summary.failed(),
                    "cancelled": summary.cancelled,
                    "halted": summary.halted,
                }
            });
            serde_json::to_writer(&mut *out, &body)?;
            writeln!(out)
        }
    }
}
