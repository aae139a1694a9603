//! Console rendering of case and backend results.

use std::io::{self, Write};

use console::{StyledObject, style};

use crate::eval::{CaseOutcome, CaseReport, SkipReason};

/// Green `OK` or red `FAIL`, bold.
pub fn status(ok: bool) -> StyledObject<&'static str> {
    if ok {
        style("OK").green().bold()
    } else {
        style("FAIL").red().bold()
    }
}

/// Write the lines for one case.
///
/// Filtered cases print nothing. An unsupported op prints a single notice;
/// otherwise every error line is followed by the case's status line.
pub fn write_case(out: &mut dyn Write, report: &CaseReport) -> io::Result<()> {
    match &report.outcome {
        CaseOutcome::Skipped(SkipReason::Filtered) => Ok(()),
        CaseOutcome::Skipped(SkipReason::Unsupported { .. }) => {
            writeln!(out, "  {}: not supported", report.op)
        }
        outcome => {
            for error in &report.errors {
                writeln!(out, "    Error: {error}")?;
            }
            writeln!(
                out,
                "  {}({}): {}",
                report.op,
                report.vars,
                status(*outcome == CaseOutcome::Passed)
            )
        }
    }
}
