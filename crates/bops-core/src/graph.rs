//! Graph arena.
//!
//! Test graphs are built on a `Graph` that owns every node in a flat `Vec`.
//! `NodeId` is an index into that arena. The arena is reset between test
//! cases instead of being dropped, so the allocation is reused.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{DType, MAX_DIMS, Shape};
use crate::{BopsError, Result};

/// Unique identifier for a node in the graph arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Storage description of a tensor: element type, logical dims and byte strides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorMeta {
    pub dtype: DType,
    pub shape: Shape,
    pub nb: [usize; MAX_DIMS],
}

impl TensorMeta {
    /// Metadata for a densely packed tensor.
    pub fn contiguous(dtype: DType, shape: Shape) -> Self {
        Self {
            dtype,
            shape,
            nb: shape.contiguous_strides(dtype),
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.numel() as usize
    }

    /// Bytes spanned by the tensor, including gaps left by non-contiguous strides.
    pub fn nbytes(&self) -> usize {
        if self.shape.0.iter().any(|&d| d <= 0) {
            return 0;
        }
        let blck = self.dtype.block_size();
        let ne = &self.shape.0;
        let first = if blck == 1 {
            self.dtype.type_size()
        } else {
            ne[0] as usize * self.nb[0] / blck
        };
        let start = if blck == 1 { 0 } else { 1 };
        let mut n = first;
        for i in start..MAX_DIMS {
            n += (ne[i] as usize - 1) * self.nb[i];
        }
        n
    }

    pub fn is_contiguous(&self) -> bool {
        self.nb == self.shape.contiguous_strides(self.dtype)
    }

    /// Whether dims 0 and 1 have been swapped relative to a packed layout.
    pub fn is_transposed(&self) -> bool {
        self.nb[0] > self.nb[1]
    }
}

/// Elementwise unary functions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Abs,
    Sgn,
    Neg,
    Step,
    Tanh,
    Elu,
    Relu,
    Gelu,
    GeluQuick,
    Silu,
    Leaky,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 11] = [
        UnaryOp::Abs,
        UnaryOp::Sgn,
        UnaryOp::Neg,
        UnaryOp::Step,
        UnaryOp::Tanh,
        UnaryOp::Elu,
        UnaryOp::Relu,
        UnaryOp::Gelu,
        UnaryOp::GeluQuick,
        UnaryOp::Silu,
        UnaryOp::Leaky,
    ];

    pub fn desc(self) -> &'static str {
        match self {
            UnaryOp::Abs => "ABS",
            UnaryOp::Sgn => "SGN",
            UnaryOp::Neg => "NEG",
            UnaryOp::Step => "STEP",
            UnaryOp::Tanh => "TANH",
            UnaryOp::Elu => "ELU",
            UnaryOp::Relu => "RELU",
            UnaryOp::Gelu => "GELU",
            UnaryOp::GeluQuick => "GELU_QUICK",
            UnaryOp::Silu => "SILU",
            UnaryOp::Leaky => "LEAKY",
        }
    }
}

/// Sort direction for `ArgSort`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// The set of operations a test graph may contain.
#[derive(Clone, Debug, PartialEq)]
pub enum OpKind {
    // ── Sources ─────────────────────────────────────────────────────────
    /// Leaf tensor, filled by the harness before execution.
    Input,

    // ── Elementwise ─────────────────────────────────────────────────────
    Unary(UnaryOp),
    Add,
    Mul,
    Div,
    Sqr,
    /// Multiply by the single value held in input 1.
    Scale,
    Clamp {
        min: f32,
        max: f32,
    },

    // ── Data movement ───────────────────────────────────────────────────
    /// Gather rows of input 0 selected by the I32 indices in input 1.
    GetRows,
    /// Tile input 0 to the output shape.
    Repeat,
    Dup,
    /// Copy input 0 into the storage of input 1, converting dtype.
    Cpy,
    /// Materialize a possibly strided input as a packed tensor.
    Cont,
    /// Concatenate inputs 0 and 1 along dim 2.
    Concat,

    // ── Normalization ───────────────────────────────────────────────────
    Norm {
        eps: f32,
    },
    RmsNorm {
        eps: f32,
    },

    // ── Linear algebra ──────────────────────────────────────────────────
    /// `out[i, j] = Σ_k a[k, i] * b[k, j]`, broadcasting a over dims 2 and 3.
    MulMat,
    /// Inputs are `[ids, b, a_0, .., a_n]`; multiplies `a_{ids[id]}` by b.
    MulMatId {
        id: usize,
    },

    // ── Attention ───────────────────────────────────────────────────────
    DiagMaskInf {
        n_past: usize,
    },
    SoftMax,
    /// Rotary embeddings; input 1 holds one I32 position per dim-2 index.
    Rope {
        n_dims: usize,
        mode: u32,
        n_ctx: usize,
        freq_base: f32,
    },
    Alibi {
        n_past: usize,
        n_head: usize,
        bias_max: f32,
    },

    // ── Convolution ─────────────────────────────────────────────────────
    /// Unfold input 1 into columns using the kernel shape of input 0.
    Im2Col {
        s0: usize,
        s1: usize,
        p0: usize,
        p1: usize,
        d0: usize,
        d1: usize,
        is_2d: bool,
    },

    // ── Reductions ──────────────────────────────────────────────────────
    SumRows,
    ArgSort {
        order: SortOrder,
    },

    // ── Views ───────────────────────────────────────────────────────────
    Reshape,
    Transpose,
    Permute {
        axes: [usize; MAX_DIMS],
    },
}

impl OpKind {
    /// Upper-case operation name, as matched by the op filter.
    pub fn desc(&self) -> &'static str {
        match self {
            OpKind::Input => "NONE",
            OpKind::Unary(u) => u.desc(),
            OpKind::Add => "ADD",
            OpKind::Mul => "MUL",
            OpKind::Div => "DIV",
            OpKind::Sqr => "SQR",
            OpKind::Scale => "SCALE",
            OpKind::Clamp { .. } => "CLAMP",
            OpKind::GetRows => "GET_ROWS",
            OpKind::Repeat => "REPEAT",
            OpKind::Dup => "DUP",
            OpKind::Cpy => "CPY",
            OpKind::Cont => "CONT",
            OpKind::Concat => "CONCAT",
            OpKind::Norm { .. } => "NORM",
            OpKind::RmsNorm { .. } => "RMS_NORM",
            OpKind::MulMat => "MUL_MAT",
            OpKind::MulMatId { .. } => "MUL_MAT_ID",
            OpKind::DiagMaskInf { .. } => "DIAG_MASK_INF",
            OpKind::SoftMax => "SOFT_MAX",
            OpKind::Rope { .. } => "ROPE",
            OpKind::Alibi { .. } => "ALIBI",
            OpKind::Im2Col { .. } => "IM2COL",
            OpKind::SumRows => "SUM_ROWS",
            OpKind::ArgSort { .. } => "ARGSORT",
            OpKind::Reshape => "RESHAPE",
            OpKind::Transpose => "TRANSPOSE",
            OpKind::Permute { .. } => "PERMUTE",
        }
    }

    /// View ops only reinterpret their source's storage and are never executed.
    pub fn is_view(&self) -> bool {
        matches!(
            self,
            OpKind::Reshape | OpKind::Transpose | OpKind::Permute { .. }
        )
    }
}

/// Storage alias: the node reads and writes `src`'s storage at `offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewOf {
    pub src: NodeId,
    pub offset: usize,
}

/// A node in the graph arena.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub op: OpKind,
    pub inputs: SmallVec<[NodeId; 2]>,
    pub meta: TensorMeta,
    /// Set for views and in-place nodes; always points at a storage-owning node.
    pub view: Option<ViewOf>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self.op, OpKind::Input)
    }

    /// Nodes that a backend has to execute (not leaves, not views).
    pub fn is_computed(&self) -> bool {
        !self.is_leaf() && !self.op.is_view()
    }
}

/// The graph arena.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a packed leaf tensor.
    pub fn new_tensor(&mut self, dtype: DType, shape: Shape) -> NodeId {
        self.push(
            OpKind::Input,
            SmallVec::new(),
            TensorMeta::contiguous(dtype, shape),
            None,
        )
    }

    /// Add a node with its own storage.
    pub fn add_node(
        &mut self,
        op: OpKind,
        inputs: SmallVec<[NodeId; 2]>,
        meta: TensorMeta,
    ) -> NodeId {
        self.push(op, inputs, meta, None)
    }

    /// Add a view of `src` starting `offset` bytes into its storage.
    pub fn add_view(
        &mut self,
        op: OpKind,
        src: NodeId,
        meta: TensorMeta,
        offset: usize,
    ) -> Result<NodeId> {
        let root = self.resolve(src, offset)?;
        Ok(self.push(op, SmallVec::from_slice(&[src]), meta, Some(root)))
    }

    /// Add a node that writes its result into the storage of `dst`.
    pub fn add_inplace(
        &mut self,
        op: OpKind,
        inputs: SmallVec<[NodeId; 2]>,
        meta: TensorMeta,
        dst: NodeId,
    ) -> Result<NodeId> {
        let root = self.resolve(dst, 0)?;
        Ok(self.push(op, inputs, meta, Some(root)))
    }

    fn resolve(&self, src: NodeId, offset: usize) -> Result<ViewOf> {
        let node = self.node(src)?;
        Ok(match node.view {
            Some(v) => ViewOf {
                src: v.src,
                offset: v.offset + offset,
            },
            None => ViewOf { src, offset },
        })
    }

    fn push(
        &mut self,
        op: OpKind,
        inputs: SmallVec<[NodeId; 2]>,
        meta: TensorMeta,
        view: Option<ViewOf>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            op,
            inputs,
            meta,
            view,
        });
        id
    }

    /// Get a node by ID.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.get(id).ok_or_else(|| {
            BopsError::InvalidArgument(format!("node {} is not in the graph", id.0))
        })
    }

    pub fn meta(&self, id: NodeId) -> Result<&TensorMeta> {
        self.node(id).map(|n| &n.meta)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Leaf tensors in declaration order.
    pub fn leaves(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Topological sort of the graph rooted at `outputs`.
    pub fn topo_sort(&self, outputs: &[NodeId]) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();

        for &out in outputs {
            self.topo_visit(out, &mut visited, &mut order);
        }

        order
    }

    fn topo_visit(&self, id: NodeId, visited: &mut [bool], order: &mut Vec<NodeId>) {
        match visited.get_mut(id.0) {
            Some(seen) if !*seen => *seen = true,
            _ => return,
        }
        if let Some(node) = self.get(id) {
            for &input in &node.inputs {
                self.topo_visit(input, visited, order);
            }
        }
        order.push(id);
    }

    /// Drop every node but keep the arena's allocation.
    pub fn reset(&mut self) {
        self.nodes.clear();
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
