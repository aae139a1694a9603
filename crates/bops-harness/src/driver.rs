//! Runs the catalog against every registered backend.

use std::io::Write;

use bops_core::{Backend, BackendRegistry};
use tracing::{info, warn};

use crate::case::TestCase;
use crate::catalog::catalog;
use crate::eval::Evaluator;
use crate::report::{status, write_case};
use crate::Result;

/// What the run measures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Compare every backend against the reference.
    #[default]
    Test,
    /// Performance evaluation. Accepted, but runs the correctness pass.
    Perf,
}

#[derive(Clone, Debug, Default)]
pub struct RunConfig {
    pub mode: Mode,
    /// Only run cases whose op descriptor equals this.
    pub op: Option<String>,
    /// Only run the registry entry with this name.
    pub backend: Option<String>,
    pub seed: Option<u64>,
}

/// Result for one registry entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendSummary {
    pub name: String,
    /// Excluded by the backend filter; counts as passed.
    pub filtered: bool,
    /// Cases passed, skipped ones included.
    pub passed: usize,
    pub skipped: usize,
    pub total: usize,
}

impl BackendSummary {
    pub fn ok(&self) -> bool {
        self.filtered || self.passed == self.total
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub backends: Vec<BackendSummary>,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.backends.iter().filter(|b| b.ok()).count()
    }

    pub fn ok(&self) -> bool {
        self.passed() == self.backends.len()
    }

    /// `0` if every backend passed, `1` otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.ok() { 0 } else { 1 }
    }
}

/// Run the full catalog against every backend in `registry`.
pub fn run(
    registry: &BackendRegistry,
    reference: &dyn Backend,
    config: &RunConfig,
    out: &mut dyn Write,
) -> Result<RunSummary> {
    run_cases(registry, reference, config, &catalog(), out)
}

/// Run `cases` against every backend in `registry`, writing the report to
/// `out`.
pub fn run_cases(
    registry: &BackendRegistry,
    reference: &dyn Backend,
    config: &RunConfig,
    cases: &[TestCase],
    out: &mut dyn Write,
) -> Result<RunSummary> {
    if config.mode == Mode::Perf {
        warn!("perf mode is not implemented, running correctness tests");
    }

    let count = registry.count();
    writeln!(out, "Testing {count} backends")?;
    writeln!(out)?;

    let mut summary = RunSummary::default();
    for index in 0..count {
        let name = registry.name(index).unwrap_or_default().to_string();
        writeln!(out, "Backend {}/{count} ({name})", index + 1)?;

        if config.backend.as_deref().is_some_and(|b| b != name) {
            writeln!(out, "  Skipping")?;
            summary.backends.push(BackendSummary {
                name,
                filtered: true,
                passed: 0,
                skipped: 0,
                total: 0,
            });
            continue;
        }

        let backend = registry.init_backend(index)?;
        writeln!(out, "  Backend name: {}", backend.name())?;
        info!(backend = backend.name(), cases = cases.len(), "testing backend");

        let result = test_backend(backend.as_ref(), reference, config, cases, out)?;
        writeln!(out, "  Backend {}: {}", backend.name(), status(result.ok()))?;
        writeln!(out)?;
        info!(
            backend = backend.name(),
            passed = result.passed,
            skipped = result.skipped,
            total = result.total,
            "backend done"
        );
        summary.backends.push(BackendSummary { name, ..result });
    }

    writeln!(out, "{}/{count} backends passed", summary.passed())?;
    writeln!(out, "{}", status(summary.ok()))?;
    Ok(summary)
}

fn test_backend(
    backend: &dyn Backend,
    reference: &dyn Backend,
    config: &RunConfig,
    cases: &[TestCase],
    out: &mut dyn Write,
) -> Result<BackendSummary> {
    let mut evaluator = Evaluator::new(reference)
        .with_op_filter(config.op.clone())
        .with_seed(config.seed);
    let mut passed = 0;
    let mut skipped = 0;
    for (index, case) in cases.iter().enumerate() {
        let report = evaluator.eval_case(backend, case, index)?;
        write_case(out, &report)?;
        if report.outcome.counts_as_pass() {
            passed += 1;
        }
        if report.outcome.is_skipped() {
            skipped += 1;
        }
    }
    writeln!(out, "  {passed}/{} tests passed", cases.len())?;
    Ok(BackendSummary {
        name: backend.name().to_string(),
        filtered: false,
        passed,
        skipped,
        total: cases.len(),
    })
}
