//! Graph builder: one function per operation.
//!
//! Each function validates input dtypes and shapes, infers the output
//! `TensorMeta` and appends the node to the graph arena. Nothing is allocated
//! or computed here.

use bops_core::graph::{Graph, OpKind, SortOrder, TensorMeta, UnaryOp};
use bops_core::{DType, NodeId, Shape};
use smallvec::SmallVec;

use crate::dtype_rules::{check_inputs, output_dtype};
use crate::shape_inference::{ShapeError, infer_shape};

type BuildResult = Result<NodeId, ShapeError>;

/// Rotary frequency base used by every rope node.
pub const ROPE_FREQ_BASE: f32 = 10000.0;

/// Declare a packed leaf tensor.
pub fn new_tensor(g: &mut Graph, dtype: DType, ne: [i64; 4]) -> BuildResult {
    if ne.iter().any(|&n| n < 1) {
        return Err(ShapeError::Empty(Shape::new(ne)));
    }
    if ne[0] % dtype.block_size() as i64 != 0 {
        return Err(ShapeError::PartialBlock { dtype, ne0: ne[0] });
    }
    Ok(g.new_tensor(dtype, Shape::new(ne)))
}

/// Append a computed node with a packed output.
fn op_node(g: &mut Graph, op: OpKind, inputs: &[NodeId]) -> BuildResult {
    op_node_shaped(g, op, inputs, None)
}

/// Like `op_node`, with an extra shape-only operand for inference.
fn op_node_shaped(
    g: &mut Graph,
    op: OpKind,
    inputs: &[NodeId],
    template: Option<Shape>,
) -> BuildResult {
    let mut shapes = Vec::with_capacity(inputs.len() + 1);
    let mut dtypes = Vec::with_capacity(inputs.len());
    for &id in inputs {
        let meta = g.meta(id)?;
        shapes.push(meta.shape);
        dtypes.push(meta.dtype);
    }
    shapes.extend(template);
    check_inputs(&op, &dtypes)?;
    let shape_refs: Vec<&Shape> = shapes.iter().collect();
    let shape = infer_shape(&op, &shape_refs)?;
    let dtype = output_dtype(&op, &dtypes);
    Ok(g.add_node(
        op,
        SmallVec::from_slice(inputs),
        TensorMeta::contiguous(dtype, shape),
    ))
}

// ── Elementwise ─────────────────────────────────────────────────────────

pub fn unary(g: &mut Graph, op: UnaryOp, a: NodeId) -> BuildResult {
    op_node(g, OpKind::Unary(op), &[a])
}

pub fn add(g: &mut Graph, a: NodeId, b: NodeId) -> BuildResult {
    op_node(g, OpKind::Add, &[a, b])
}

pub fn mul(g: &mut Graph, a: NodeId, b: NodeId) -> BuildResult {
    op_node(g, OpKind::Mul, &[a, b])
}

pub fn div(g: &mut Graph, a: NodeId, b: NodeId) -> BuildResult {
    op_node(g, OpKind::Div, &[a, b])
}

pub fn sqr(g: &mut Graph, a: NodeId) -> BuildResult {
    op_node(g, OpKind::Sqr, &[a])
}

/// Multiply `a` by the single element of `s`.
pub fn scale(g: &mut Graph, a: NodeId, s: NodeId) -> BuildResult {
    op_node(g, OpKind::Scale, &[a, s])
}

pub fn clamp(g: &mut Graph, a: NodeId, min: f32, max: f32) -> BuildResult {
    if min > max {
        return Err(ShapeError::Mismatch(format!("clamp range [{min}, {max}] is empty")));
    }
    op_node(g, OpKind::Clamp { min, max }, &[a])
}

// ── Data movement ───────────────────────────────────────────────────────

pub fn get_rows(g: &mut Graph, a: NodeId, rows: NodeId) -> BuildResult {
    op_node(g, OpKind::GetRows, &[a, rows])
}

/// Tile `a` to the shape of `target`. `target` only donates its shape.
pub fn repeat(g: &mut Graph, a: NodeId, target: NodeId) -> BuildResult {
    let shape = g.meta(target)?.shape;
    op_node_shaped(g, OpKind::Repeat, &[a], Some(shape))
}

pub fn dup(g: &mut Graph, a: NodeId) -> BuildResult {
    op_node(g, OpKind::Dup, &[a])
}

/// Copy `a` into `b`, converting to `b`'s dtype. The result aliases `b`.
pub fn cpy(g: &mut Graph, a: NodeId, b: NodeId) -> BuildResult {
    let ma = g.meta(a)?.clone();
    let mb = g.meta(b)?.clone();
    check_inputs(&OpKind::Cpy, &[ma.dtype, mb.dtype])?;
    let shape = infer_shape(&OpKind::Cpy, &[&ma.shape, &mb.shape])?;
    let meta = TensorMeta {
        dtype: mb.dtype,
        shape,
        nb: mb.nb,
    };
    Ok(g.add_inplace(OpKind::Cpy, SmallVec::from_slice(&[a, b]), meta, b)?)
}

pub fn cont(g: &mut Graph, a: NodeId) -> BuildResult {
    op_node(g, OpKind::Cont, &[a])
}

/// Concatenate along dim 2.
pub fn concat(g: &mut Graph, a: NodeId, b: NodeId) -> BuildResult {
    op_node(g, OpKind::Concat, &[a, b])
}

// ── Normalization ───────────────────────────────────────────────────────

pub fn norm(g: &mut Graph, a: NodeId, eps: f32) -> BuildResult {
    op_node(g, OpKind::Norm { eps }, &[a])
}

pub fn rms_norm(g: &mut Graph, a: NodeId, eps: f32) -> BuildResult {
    op_node(g, OpKind::RmsNorm { eps }, &[a])
}

// ── Linear algebra ──────────────────────────────────────────────────────

/// `a` is `[k, m, ..]`, `b` is `[k, n, ..]`; the result is `[m, n, ..]`.
pub fn mul_mat(g: &mut Graph, a: NodeId, b: NodeId) -> BuildResult {
    op_node(g, OpKind::MulMat, &[a, b])
}

/// Multiply `as_[ids[id]]` by `b`.
pub fn mul_mat_id(g: &mut Graph, as_: &[NodeId], ids: NodeId, id: usize, b: NodeId) -> BuildResult {
    let mut inputs = Vec::with_capacity(as_.len() + 2);
    inputs.push(ids);
    inputs.push(b);
    inputs.extend_from_slice(as_);
    op_node(g, OpKind::MulMatId { id }, &inputs)
}

// ── Attention ───────────────────────────────────────────────────────────

pub fn diag_mask_inf(g: &mut Graph, a: NodeId, n_past: usize) -> BuildResult {
    op_node(g, OpKind::DiagMaskInf { n_past }, &[a])
}

pub fn soft_max(g: &mut Graph, a: NodeId) -> BuildResult {
    op_node(g, OpKind::SoftMax, &[a])
}

/// Rotate `a` by the positions in `pos` (one I32 per dim-2 index).
pub fn rope(
    g: &mut Graph,
    a: NodeId,
    pos: NodeId,
    n_dims: usize,
    mode: u32,
    n_ctx: usize,
) -> BuildResult {
    let op = OpKind::Rope {
        n_dims,
        mode,
        n_ctx,
        freq_base: ROPE_FREQ_BASE,
    };
    op_node(g, op, &[a, pos])
}

pub fn alibi(g: &mut Graph, a: NodeId, n_past: usize, n_head: usize, bias_max: f32) -> BuildResult {
    let ne2 = g.meta(a)?.shape.0[2];
    if n_head as i64 != ne2 {
        return Err(ShapeError::Mismatch(format!(
            "alibi with {n_head} heads over dim 2 of size {ne2}"
        )));
    }
    op_node(
        g,
        OpKind::Alibi {
            n_past,
            n_head,
            bias_max,
        },
        &[a],
    )
}

// ── Convolution ─────────────────────────────────────────────────────────

/// Unfold `input` into columns the size of `kernel`.
#[allow(clippy::too_many_arguments)]
pub fn im2col(
    g: &mut Graph,
    kernel: NodeId,
    input: NodeId,
    s0: usize,
    s1: usize,
    p0: usize,
    p1: usize,
    d0: usize,
    d1: usize,
    is_2d: bool,
) -> BuildResult {
    if s0 == 0 || (is_2d && s1 == 0) {
        return Err(ShapeError::Mismatch("im2col stride must be positive".into()));
    }
    let op = OpKind::Im2Col {
        s0,
        s1,
        p0,
        p1,
        d0,
        d1,
        is_2d,
    };
    op_node(g, op, &[kernel, input])
}

// ── Reductions ──────────────────────────────────────────────────────────

pub fn sum_rows(g: &mut Graph, a: NodeId) -> BuildResult {
    op_node(g, OpKind::SumRows, &[a])
}

pub fn argsort(g: &mut Graph, a: NodeId, order: SortOrder) -> BuildResult {
    op_node(g, OpKind::ArgSort { order }, &[a])
}

// ── Views ───────────────────────────────────────────────────────────────

/// Swap dims 0 and 1 without moving data.
pub fn transpose(g: &mut Graph, a: NodeId) -> BuildResult {
    permute(g, a, [1, 0, 2, 3])
}

/// Move source dim `i` to position `axes[i]` without moving data.
pub fn permute(g: &mut Graph, a: NodeId, axes: [usize; 4]) -> BuildResult {
    let src = g.meta(a)?.clone();
    if src.dtype.is_quantized() && axes[0] != 0 {
        return Err(ShapeError::BadDType {
            op: "PERMUTE",
            idx: 0,
            dtype: src.dtype,
        });
    }
    let op = if axes == [1, 0, 2, 3] {
        OpKind::Transpose
    } else {
        OpKind::Permute { axes }
    };
    let shape = infer_shape(&op, &[&src.shape])?;
    let mut nb = [0usize; 4];
    for (i, &ax) in axes.iter().enumerate() {
        nb[ax] = src.nb[i];
    }
    let meta = TensorMeta {
        dtype: src.dtype,
        shape,
        nb,
    };
    Ok(g.add_view(op, a, meta, 0)?)
}

/// Reinterpret a packed tensor with new dims.
pub fn reshape(g: &mut Graph, a: NodeId, ne: [i64; 4]) -> BuildResult {
    let src = g.meta(a)?.clone();
    let shape = Shape::new(ne);
    if !src.is_contiguous() {
        return Err(ShapeError::Mismatch(format!(
            "cannot reshape strided tensor {}",
            src.shape
        )));
    }
    if shape.numel() != src.shape.numel() || ne[0] % src.dtype.block_size() as i64 != 0 {
        return Err(ShapeError::Mismatch(format!(
            "cannot reshape {} into {shape}",
            src.shape
        )));
    }
    let meta = TensorMeta::contiguous(src.dtype, shape);
    Ok(g.add_view(OpKind::Reshape, a, meta, 0)?)
}
