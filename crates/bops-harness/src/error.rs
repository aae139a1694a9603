use bops_core::BopsError;
use bops_ops::ShapeError;

pub type Result<T> = std::result::Result<T, HarnessError>;

/// Fatal harness errors.
///
/// Numerical disagreement between backends is never an error; it is reported
/// through [`crate::compare::Mismatch`]. Everything here means the harness or
/// its catalog is broken and the run must stop.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("malformed test case: {0}")]
    Malformed(String),

    #[error("graph construction failed: {0}")]
    Build(#[from] ShapeError),

    #[error(transparent)]
    Core(#[from] BopsError),

    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
}
