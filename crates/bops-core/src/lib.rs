//! Core building blocks for differential backend testing.
//!
//! `bops-core` provides the foundational types (`DType`, `Shape`, `TensorMeta`),
//! a no-allocation graph arena, block-quantization codecs and the
//! backend-agnostic interface used to execute graphs.
//!
//! # Backends
//!
//! - [`cpu_kernels::CpuRefBackend`]: pure Rust correctness oracle
//! - `bops-cpu`: an independently written tiled CPU backend and the default registry

pub mod backend;
pub mod cpu_kernels;
pub mod graph;
pub mod quants;
pub mod tensor;
pub mod types;

pub use backend::{Backend, BackendRegistry, GraphBuffer, NodeInput, NodeVisit};
pub use graph::{Graph, Node, NodeId, OpKind, SortOrder, TensorMeta, UnaryOp};
pub use types::{DType, MAX_DIMS, Shape};

pub type Result<T> = std::result::Result<T, BopsError>;

#[derive(thiserror::Error, Debug)]
pub enum BopsError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<i64>, got: Vec<i64> },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("dtype {dtype} is not supported by {context}")]
    UnsupportedDType { dtype: DType, context: &'static str },

    #[error("{n} elements is not a multiple of the {dtype} block size {block}")]
    PartialBlock { dtype: DType, n: usize, block: usize },

    #[error("tensor access out of bounds: {offset}+{len} > {size}")]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[error("backend {backend} does not support {op}")]
    UnsupportedOp { backend: String, op: &'static str },
}
