//! Evaluation of one test case against a candidate/reference backend pair.
//!
//! The evaluator owns the graph arena. Every case is built into it, run and
//! compared, and the arena is reset afterwards on every path, including
//! filtered, unsupported and fatal ones.

use std::ops::ControlFlow;

use bops_core::backend::compare_graph_backend;
use bops_core::{Backend, Graph, NodeId};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::case::TestCase;
use crate::compare::compare;
use crate::value::tensor_to_f64;
use crate::{HarnessError, Result};

/// Golden-ratio increment used to spread case indices across seeds.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Why a case did not run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// The op does not match the `-o` filter.
    Filtered,
    /// One of the two backends declined the op.
    Unsupported { backend: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaseOutcome {
    Passed,
    Failed,
    Skipped(SkipReason),
}

impl CaseOutcome {
    /// Skipped cases count towards the passed total.
    pub fn counts_as_pass(&self) -> bool {
        !matches!(self, CaseOutcome::Failed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CaseOutcome::Skipped(_))
    }
}

/// What happened to one case.
#[derive(Clone, Debug)]
pub struct CaseReport {
    /// Descriptor of the case's output op, e.g. `MUL_MAT`.
    pub op: &'static str,
    pub vars: String,
    pub outcome: CaseOutcome,
    /// Largest metric seen over the compared nodes. `+inf` after a
    /// special-value mismatch, `0.0` if nothing was compared.
    pub worst_nmse: f64,
    /// One line per failed node or execution error, `OP: reason`.
    pub errors: Vec<String>,
}

impl CaseReport {
    fn new(op: &'static str, vars: String) -> Self {
        Self {
            op,
            vars,
            outcome: CaseOutcome::Passed,
            worst_nmse: 0.0,
            errors: Vec::new(),
        }
    }

    fn skipped(mut self, reason: SkipReason) -> Self {
        self.outcome = CaseOutcome::Skipped(reason);
        self
    }
}

/// Runs cases against a fixed reference backend.
pub struct Evaluator<'r> {
    reference: &'r dyn Backend,
    op_filter: Option<String>,
    seed: Option<u64>,
    graph: Graph,
}

impl<'r> Evaluator<'r> {
    pub fn new(reference: &'r dyn Backend) -> Self {
        Self {
            reference,
            op_filter: None,
            seed: None,
            graph: Graph::new(),
        }
    }

    /// Only run cases whose output op descriptor equals `op`.
    pub fn with_op_filter(mut self, op: Option<String>) -> Self {
        self.op_filter = op;
        self
    }

    /// Draw inputs deterministically. Without a seed every case is seeded
    /// from the OS.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn reference(&self) -> &dyn Backend {
        self.reference
    }

    /// Evaluate `case` on `candidate` and the reference.
    ///
    /// `index` is the case's position in the catalog and only feeds the
    /// input seed. Numerical disagreement and backend execution errors are
    /// reported as a failed case; an `Err` means the case itself is malformed.
    pub fn eval_case(
        &mut self,
        candidate: &dyn Backend,
        case: &TestCase,
        index: usize,
    ) -> Result<CaseReport> {
        let result = self.eval_in_arena(candidate, case, index);
        self.graph.reset();
        result
    }

    fn case_rng(&self, index: usize) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ (index as u64).wrapping_mul(SEED_STRIDE)),
            None => StdRng::from_os_rng(),
        }
    }

    fn eval_in_arena(
        &mut self,
        candidate: &dyn Backend,
        case: &TestCase,
        index: usize,
    ) -> Result<CaseReport> {
        let out = case.build_graph(&mut self.graph)?;
        let mut rng = self.case_rng(index);
        let graph = &self.graph;
        let op = graph.node(out)?.op.desc();
        let mut report = CaseReport::new(op, case.vars());

        if self.op_filter.as_deref().is_some_and(|filter| filter != op) {
            return Ok(report.skipped(SkipReason::Filtered));
        }

        for backend in [candidate, self.reference] {
            if !supports_graph(backend, graph, out)? {
                warn!(backend = backend.name(), op, "op not supported");
                return Ok(report.skipped(SkipReason::Unsupported {
                    backend: backend.name().to_string(),
                }));
            }
        }

        let mut buffer = match candidate.alloc_graph(graph) {
            Ok(buffer) => buffer,
            Err(e) => {
                report.errors.push(format!("{op}: failed to allocate tensors: {e}"));
                report.outcome = CaseOutcome::Failed;
                return Ok(report);
            }
        };
        case.initialize_tensors(graph, &mut buffer, &mut rng)?;

        let max_err = case.max_nmse_err();
        let mut fatal: Option<HarnessError> = None;
        let mut worst = 0.0f64;
        let mut errors = Vec::new();
        let executed = compare_graph_backend(
            candidate,
            self.reference,
            graph,
            out,
            &mut buffer,
            |visit| {
                let meta = &visit.node.meta;
                let decoded = tensor_to_f64(meta, visit.reference)
                    .and_then(|r| Ok((r, tensor_to_f64(meta, visit.candidate)?)));
                let (reference, cand) = match decoded {
                    Ok(pair) => pair,
                    Err(e) => {
                        fatal = Some(e);
                        return ControlFlow::Break(());
                    }
                };

                let cmp = compare(&reference, &cand, max_err);
                worst = worst.max(cmp.nmse);
                let node_op = visit.node.op.desc();
                debug!(op = node_op, nmse = cmp.nmse, "node compared");
                match cmp.mismatch {
                    None => ControlFlow::Continue(()),
                    Some(mismatch) => {
                        errors.push(format!("{node_op}: {mismatch}"));
                        if mismatch.is_special() {
                            ControlFlow::Break(())
                        } else {
                            ControlFlow::Continue(())
                        }
                    }
                }
            },
        );
        if let Some(e) = fatal {
            return Err(e);
        }
        if let Err(e) = executed {
            errors.push(format!("{op}: {e}"));
        }

        report.worst_nmse = worst;
        report.outcome = if errors.is_empty() {
            CaseOutcome::Passed
        } else {
            CaseOutcome::Failed
        };
        report.errors = errors;
        debug!(op, vars = %report.vars, nmse = worst, outcome = ?report.outcome, "case done");
        Ok(report)
    }
}

/// Whether `backend` accepts every node it would have to execute.
fn supports_graph(backend: &dyn Backend, graph: &Graph, out: NodeId) -> Result<bool> {
    for id in graph.topo_sort(&[out]) {
        let node = graph.node(id)?;
        if node.is_computed() && !backend.supports_op(graph, node) {
            return Ok(false);
        }
    }
    Ok(true)
}
