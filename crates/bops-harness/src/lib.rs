//! Differential correctness harness for tensor backends.
//!
//! Every [`TestCase`] builds a small graph, fills its inputs once and runs it
//! on a candidate and a reference backend side by side. Each executed node is
//! compared with a normalized mean squared error metric and a strict policy for
//! NaN and saturated values.
//!
//! - [`value`]: decode tensor storage to `f64`, encode random inputs
//! - [`compare`]: the NMSE comparator
//! - [`case`] and [`catalog`]: the operation families and their parameters
//! - [`eval`]: one case against one backend pair
//! - [`driver`]: every registered backend against the whole catalog

pub mod case;
pub mod catalog;
pub mod compare;
pub mod driver;
mod error;
pub mod eval;
pub mod report;
pub mod value;

pub use case::{BinaryOp, TestCase};
pub use catalog::catalog;
pub use compare::{Comparison, Mismatch, compare, nmse};
pub use driver::{BackendSummary, Mode, RunConfig, RunSummary, run};
pub use error::{HarnessError, Result};
pub use eval::{CaseOutcome, CaseReport, Evaluator, SkipReason};
