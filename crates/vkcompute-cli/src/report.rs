use std::fmt::{self, Write as _};

use serde::Serialize;

use vkcompute_session::{SessionError, Step};

// ── Step report types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepReport {
    pub fn pass(step: Step) -> Self {
        Self {
            step: step.name().to_string(),
            status: StepStatus::Pass,
            message: None,
        }
    }

    pub fn fail(step: Step, cause: &dyn fmt::Display) -> Self {
        Self {
            step: step.name().to_string(),
            status: StepStatus::Fail,
            message: Some(cause.to_string()),
        }
    }

    pub fn skip(step: Step, reason: &str) -> Self {
        Self {
            step: step.name().to_string(),
            status: StepStatus::Skip,
            message: Some(reason.to_string()),
        }
    }

    pub fn from_result(step: Step, result: &Result<(), SessionError>) -> Self {
        match result {
            Ok(()) => Self::pass(step),
            Err(e) => Self::fail(step, e),
        }
    }
}

/// Mark every planned step without a report as skipped.
pub fn fill_skipped(reports: &mut Vec<StepReport>, planned: &[Step]) {
    for step in planned.iter().skip(reports.len()) {
        reports.push(StepReport::skip(*step, "not run after an earlier failure"));
    }
}

pub fn has_failures(reports: &[StepReport]) -> bool {
    reports.iter().any(|r| r.status == StepStatus::Fail)
}

// ── Output ──────────────────────────────────────────────────────────────────

pub fn render_pretty(title: &str, reports: &[StepReport]) -> String {
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", title);
    let _ = writeln!(out, "{}", "=".repeat(title.len()));
    let _ = writeln!(out);

    let mut pass_count = 0u32;
    let mut fail_count = 0u32;
    let mut skip_count = 0u32;

    for report in reports {
        let (icon, color_start, color_end) = match report.status {
            StepStatus::Pass => {
                pass_count += 1;
                ("[PASS]", "\x1b[32m", "\x1b[0m")
            }
            StepStatus::Fail => {
                fail_count += 1;
                ("[FAIL]", "\x1b[31m", "\x1b[0m")
            }
            StepStatus::Skip => {
                skip_count += 1;
                ("[SKIP]", "\x1b[90m", "\x1b[0m")
            }
        };

        match &report.message {
            Some(message) => {
                let _ = writeln!(
                    out,
                    "  {}{}{} {} - {}",
                    color_start, icon, color_end, report.step, message
                );
            }
            None => {
                let _ = writeln!(out, "  {}{}{} {}", color_start, icon, color_end, report.step);
            }
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "-".repeat(title.len()));
    let _ = writeln!(
        out,
        "  {} passed, {} failed, {} skipped",
        pass_count, fail_count, skip_count
    );
    out
}

pub fn render_json(reports: &[StepReport]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(reports)
}
