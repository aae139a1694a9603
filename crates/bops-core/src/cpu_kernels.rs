//! Built-in CPU reference backend, the correctness oracle.
//!
//! This is an intentionally simple, safe Rust implementation of every op.
//! It prioritizes correctness and readability over performance. All data is
//! dense and in logical order: dim 0 varies fastest.

use crate::backend::{Backend, NodeInput};
use crate::graph::{OpKind, SortOrder, TensorMeta, UnaryOp};
use crate::types::Shape;
use crate::{BopsError, Result};

/// Reference CPU backend.
pub struct CpuRefBackend;

impl Backend for CpuRefBackend {
    fn name(&self) -> &str {
        "CPU"
    }

    fn eval_node(
        &self,
        op: &OpKind,
        inputs: &[NodeInput<'_>],
        output_meta: &TensorMeta,
    ) -> Result<Vec<f32>> {
        match op {
            OpKind::Input => Err(BopsError::InvalidArgument(
                "Input nodes are filled by the caller, not evaluated".into(),
            )),
            OpKind::Reshape | OpKind::Transpose | OpKind::Permute { .. } => Err(
                BopsError::InvalidArgument(format!("{} is a view and is not evaluated", op.desc())),
            ),
            OpKind::Unary(u) => {
                let a = require_input(inputs, 0)?;
                Ok(a.data.iter().map(|&x| unary(*u, x)).collect())
            }
            OpKind::Add => binary_bcast(inputs, |a, b| a + b),
            OpKind::Mul => binary_bcast(inputs, |a, b| a * b),
            OpKind::Div => binary_bcast(inputs, |a, b| a / b),
            OpKind::Sqr => {
                let a = require_input(inputs, 0)?;
                Ok(a.data.iter().map(|x| x * x).collect())
            }
            OpKind::Scale => {
                let a = require_input(inputs, 0)?;
                let s = require_input(inputs, 1)?;
                let s = *s.data.first().ok_or_else(|| {
                    BopsError::InvalidArgument("scale factor tensor is empty".into())
                })?;
                Ok(a.data.iter().map(|x| x * s).collect())
            }
            OpKind::Clamp { min, max } => {
                let a = require_input(inputs, 0)?;
                Ok(a.data.iter().map(|x| x.max(*min).min(*max)).collect())
            }
            OpKind::GetRows => get_rows(inputs, output_meta),
            OpKind::Repeat => repeat(inputs, output_meta),
            OpKind::Dup | OpKind::Cont | OpKind::Cpy => {
                let a = require_input(inputs, 0)?;
                Ok(a.data.to_vec())
            }
            OpKind::Concat => concat(inputs, output_meta),
            OpKind::Norm { eps } => norm(inputs, *eps),
            OpKind::RmsNorm { eps } => rms_norm(inputs, *eps),
            OpKind::MulMat => {
                let a = require_input(inputs, 0)?;
                let b = require_input(inputs, 1)?;
                mul_mat(a, b)
            }
            OpKind::MulMatId { id } => mul_mat_id(inputs, *id),
            OpKind::DiagMaskInf { n_past } => diag_mask_inf(inputs, *n_past),
            OpKind::SoftMax => softmax(inputs),
            OpKind::Rope {
                n_dims,
                mode,
                freq_base,
                ..
            } => rope(inputs, *n_dims, *mode, *freq_base),
            OpKind::Alibi {
                n_past: _,
                n_head,
                bias_max,
            } => alibi(inputs, *n_head, *bias_max),
            OpKind::Im2Col {
                s0,
                s1,
                p0,
                p1,
                d0,
                d1,
                is_2d,
            } => im2col(inputs, output_meta, [*s0, *s1], [*p0, *p1], [*d0, *d1], *is_2d),
            OpKind::SumRows => {
                let a = require_input(inputs, 0)?;
                let ne0 = a.shape.0[0] as usize;
                Ok(a.data.chunks_exact(ne0).map(|r| r.iter().sum()).collect())
            }
            OpKind::ArgSort { order } => argsort(inputs, *order),
        }
    }
}

/// Elementwise unary function shared by every CPU backend.
pub fn unary(op: UnaryOp, x: f32) -> f32 {
    match op {
        UnaryOp::Abs => x.abs(),
        UnaryOp::Sgn => {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        UnaryOp::Neg => -x,
        UnaryOp::Step => {
            if x > 0.0 {
                1.0
            } else {
                0.0
            }
        }
        UnaryOp::Tanh => x.tanh(),
        UnaryOp::Elu => {
            if x > 0.0 {
                x
            } else {
                x.exp_m1()
            }
        }
        UnaryOp::Relu => x.max(0.0),
        UnaryOp::Gelu => {
            0.5 * x
                * (1.0
                    + ((2.0 / std::f32::consts::PI).sqrt() * (x + 0.044715 * x * x * x)).tanh())
        }
        UnaryOp::GeluQuick => x * sigmoid(1.702 * x),
        UnaryOp::Silu => x * sigmoid(x),
        UnaryOp::Leaky => {
            if x > 0.0 {
                x
            } else {
                0.1 * x
            }
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// `ne` as `usize`.
pub(crate) fn dims(shape: &Shape) -> [usize; 4] {
    shape.0.map(|d| d as usize)
}

/// Flat index of `(i0, i1, i2, i3)` in a dense tensor with dims `ne`.
#[inline]
pub(crate) fn flat(ne: [usize; 4], i0: usize, i1: usize, i2: usize, i3: usize) -> usize {
    ((i3 * ne[2] + i2) * ne[1] + i1) * ne[0] + i0
}

pub fn require_input<'a>(inputs: &'a [NodeInput<'_>], idx: usize) -> Result<&'a NodeInput<'a>> {
    inputs
        .get(idx)
        .ok_or_else(|| BopsError::InvalidArgument(format!("expected input at index {idx}")))
}

fn index_value(v: f32, limit: usize, what: &str) -> Result<usize> {
    if v < 0.0 || v as usize >= limit {
        return Err(BopsError::InvalidArgument(format!(
            "{what} {v} outside [0, {limit})"
        )));
    }
    Ok(v as usize)
}

// ── Elementwise ─────────────────────────────────────────────────────────

fn binary_bcast(inputs: &[NodeInput<'_>], f: fn(f32, f32) -> f32) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let b = require_input(inputs, 1)?;
    if !b.shape.can_repeat_into(a.shape) {
        return Err(BopsError::ShapeMismatch {
            expected: a.shape.0.to_vec(),
            got: b.shape.0.to_vec(),
        });
    }
    let ne = dims(a.shape);
    let nb = dims(b.shape);
    let mut out = Vec::with_capacity(a.data.len());
    for i3 in 0..ne[3] {
        for i2 in 0..ne[2] {
            for i1 in 0..ne[1] {
                for i0 in 0..ne[0] {
                    let x = a.data[flat(ne, i0, i1, i2, i3)];
                    let y = b.data[flat(nb, i0 % nb[0], i1 % nb[1], i2 % nb[2], i3 % nb[3])];
                    out.push(f(x, y));
                }
            }
        }
    }
    Ok(out)
}

// ── Data movement ───────────────────────────────────────────────────────

fn get_rows(inputs: &[NodeInput<'_>], meta: &TensorMeta) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let rows = require_input(inputs, 1)?;
    let na = dims(a.shape);
    let no = dims(&meta.shape);
    if rows.data.len() != no[1] {
        return Err(BopsError::ShapeMismatch {
            expected: vec![no[1] as i64],
            got: rows.shape.0.to_vec(),
        });
    }
    let mut out = Vec::with_capacity(meta.numel());
    for i3 in 0..no[3] {
        for i2 in 0..no[2] {
            for &r in rows.data {
                let r = index_value(r, na[1], "row index")?;
                let start = flat(na, 0, r, i2, i3);
                out.extend_from_slice(&a.data[start..start + na[0]]);
            }
        }
    }
    Ok(out)
}

fn repeat(inputs: &[NodeInput<'_>], meta: &TensorMeta) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    if !a.shape.can_repeat_into(&meta.shape) {
        return Err(BopsError::ShapeMismatch {
            expected: meta.shape.0.to_vec(),
            got: a.shape.0.to_vec(),
        });
    }
    let na = dims(a.shape);
    let no = dims(&meta.shape);
    let mut out = Vec::with_capacity(meta.numel());
    for i3 in 0..no[3] {
        for i2 in 0..no[2] {
            for i1 in 0..no[1] {
                for i0 in 0..no[0] {
                    out.push(a.data[flat(na, i0 % na[0], i1 % na[1], i2 % na[2], i3 % na[3])]);
                }
            }
        }
    }
    Ok(out)
}

fn concat(inputs: &[NodeInput<'_>], meta: &TensorMeta) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let b = require_input(inputs, 1)?;
    let na = dims(a.shape);
    let nb = dims(b.shape);
    let no = dims(&meta.shape);
    let mut out = Vec::with_capacity(meta.numel());
    for i3 in 0..no[3] {
        for i2 in 0..no[2] {
            for i1 in 0..no[1] {
                let row = if i2 < na[2] {
                    &a.data[flat(na, 0, i1, i2, i3)..][..na[0]]
                } else {
                    &b.data[flat(nb, 0, i1, i2 - na[2], i3)..][..nb[0]]
                };
                out.extend_from_slice(row);
            }
        }
    }
    Ok(out)
}

// ── Normalization ───────────────────────────────────────────────────────

fn norm(inputs: &[NodeInput<'_>], eps: f32) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let ne0 = a.shape.0[0] as usize;
    let mut result = Vec::with_capacity(a.data.len());
    for row in a.data.chunks_exact(ne0) {
        let mean = row.iter().sum::<f32>() / ne0 as f32;
        let var = row.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / ne0 as f32;
        let scale = 1.0 / (var + eps).sqrt();
        result.extend(row.iter().map(|x| (x - mean) * scale));
    }
    Ok(result)
}

fn rms_norm(inputs: &[NodeInput<'_>], eps: f32) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let ne0 = a.shape.0[0] as usize;
    let mut result = Vec::with_capacity(a.data.len());
    for row in a.data.chunks_exact(ne0) {
        let mean_sq = row.iter().map(|x| x * x).sum::<f32>() / ne0 as f32;
        let scale = 1.0 / (mean_sq + eps).sqrt();
        result.extend(row.iter().map(|x| x * scale));
    }
    Ok(result)
}

// ── Linear algebra ──────────────────────────────────────────────────────

/// `a` is `[k, m, a2, a3]`, `b` is `[k, n, b2, b3]`, result is `[m, n, b2, b3]`.
pub fn mul_mat(a: &NodeInput<'_>, b: &NodeInput<'_>) -> Result<Vec<f32>> {
    let na = dims(a.shape);
    let nb = dims(b.shape);
    if na[0] != nb[0] || nb[2] % na[2] != 0 || nb[3] % na[3] != 0 {
        return Err(BopsError::ShapeMismatch {
            expected: a.shape.0.to_vec(),
            got: b.shape.0.to_vec(),
        });
    }
    let (k, m, n) = (na[0], na[1], nb[1]);
    let r2 = nb[2] / na[2];
    let r3 = nb[3] / na[3];

    let mut data = vec![0.0f32; m * n * nb[2] * nb[3]];
    for i3 in 0..nb[3] {
        for i2 in 0..nb[2] {
            let out_base = (i3 * nb[2] + i2) * m * n;
            for j in 0..n {
                let b_row = &b.data[flat(nb, 0, j, i2, i3)..][..k];
                for i in 0..m {
                    let a_row = &a.data[flat(na, 0, i, i2 / r2, i3 / r3)..][..k];
                    let mut sum = 0.0f32;
                    for p in 0..k {
                        sum += a_row[p] * b_row[p];
                    }
                    data[out_base + j * m + i] = sum;
                }
            }
        }
    }
    Ok(data)
}

fn mul_mat_id(inputs: &[NodeInput<'_>], id: usize) -> Result<Vec<f32>> {
    let ids = require_input(inputs, 0)?;
    let b = require_input(inputs, 1)?;
    let n_as = inputs.len().saturating_sub(2);
    let routed = ids.data.get(id).copied().ok_or_else(|| {
        BopsError::InvalidArgument(format!("routing slot {id} outside {} ids", ids.data.len()))
    })?;
    let sel = index_value(routed, n_as, "routing id")?;
    mul_mat(require_input(inputs, 2 + sel)?, b)
}

// ── Attention ───────────────────────────────────────────────────────────

fn diag_mask_inf(inputs: &[NodeInput<'_>], n_past: usize) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let ne = dims(a.shape);
    let mut out = a.data.to_vec();
    for (r, row) in out.chunks_exact_mut(ne[0]).enumerate() {
        let j = r % ne[1];
        for (i, v) in row.iter_mut().enumerate() {
            if i > n_past + j {
                *v = f32::NEG_INFINITY;
            }
        }
    }
    Ok(out)
}

fn softmax(inputs: &[NodeInput<'_>]) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let ne0 = a.shape.0[0] as usize;
    let mut data = a.data.to_vec();
    for row in data.chunks_exact_mut(ne0) {
        let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum_exp = 0.0f32;
        for v in row.iter_mut() {
            *v = (*v - max_val).exp();
            sum_exp += *v;
        }
        for v in row.iter_mut() {
            *v /= sum_exp;
        }
    }
    Ok(data)
}

/// Rotary embeddings. Mode bit 1 selects the NeoX layout, which rotates
/// element `i` with `i + n_dims / 2` instead of with its neighbour.
fn rope(inputs: &[NodeInput<'_>], n_dims: usize, mode: u32, base: f32) -> Result<Vec<f32>> {
    let x = require_input(inputs, 0)?;
    let pos = require_input(inputs, 1)?;
    let ne = dims(x.shape);
    if n_dims > ne[0] || !n_dims.is_multiple_of(2) {
        return Err(BopsError::InvalidArgument(format!(
            "n_dims {n_dims} must be even and <= {}",
            ne[0]
        )));
    }
    if pos.data.len() < ne[2] {
        return Err(BopsError::ShapeMismatch {
            expected: vec![ne[2] as i64],
            got: pos.shape.0.to_vec(),
        });
    }
    let neox = mode & 2 != 0;
    let half = n_dims / 2;

    let mut out = x.data.to_vec();
    for i3 in 0..ne[3] {
        for i2 in 0..ne[2] {
            let p = pos.data[i2];
            for i1 in 0..ne[1] {
                let base_idx = flat(ne, 0, i1, i2, i3);
                for ic in (0..n_dims).step_by(2) {
                    let theta = p * base.powf(-(ic as f32) / n_dims as f32);
                    let (s, c) = theta.sin_cos();
                    let (j0, j1) = if neox {
                        (ic / 2, ic / 2 + half)
                    } else {
                        (ic, ic + 1)
                    };
                    let x0 = x.data[base_idx + j0];
                    let x1 = x.data[base_idx + j1];
                    out[base_idx + j0] = x0 * c - x1 * s;
                    out[base_idx + j1] = x0 * s + x1 * c;
                }
            }
        }
    }
    Ok(out)
}

/// Per-head linear position bias `out = i0 * m_k + x`, heads flattened over dims 2 and 3.
fn alibi(inputs: &[NodeInput<'_>], n_head: usize, bias_max: f32) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    if n_head == 0 {
        return Err(BopsError::InvalidArgument("alibi needs at least one head".into()));
    }
    let ne = dims(a.shape);
    let slopes = alibi_slopes(n_head, bias_max, ne[2] * ne[3]);
    let mut out = a.data.to_vec();
    for (r, row) in out.chunks_exact_mut(ne[0]).enumerate() {
        let m_k = slopes[r / ne[1]];
        for (i, v) in row.iter_mut().enumerate() {
            *v += i as f32 * m_k;
        }
    }
    Ok(out)
}

/// Slope for each of `n` heads.
pub fn alibi_slopes(n_head: usize, bias_max: f32, n: usize) -> Vec<f32> {
    let log2_floor = 1usize << (n_head as f32).log2().floor() as u32;
    let m0 = 2.0f32.powf(-bias_max / log2_floor as f32);
    let m1 = 2.0f32.powf(-(bias_max / 2.0) / log2_floor as f32);
    (0..n)
        .map(|k| {
            if k < log2_floor {
                m0.powi(k as i32 + 1)
            } else {
                m1.powi(2 * (k - log2_floor) as i32 + 1)
            }
        })
        .collect()
}

// ── Convolution ─────────────────────────────────────────────────────────

/// Unfold input 1 into patches the size of kernel input 0.
///
/// 2D output is `[IC*KH*KW, OW, OH, N]`, 1D output is `[IC*KW, OW, N, 1]`.
fn im2col(
    inputs: &[NodeInput<'_>],
    meta: &TensorMeta,
    s: [usize; 2],
    p: [usize; 2],
    d: [usize; 2],
    is_2d: bool,
) -> Result<Vec<f32>> {
    let kernel = require_input(inputs, 0)?;
    let src = require_input(inputs, 1)?;
    let nk = dims(kernel.shape);
    let ni = dims(src.shape);
    let no = dims(&meta.shape);

    let (kw, kh) = (nk[0], if is_2d { nk[1] } else { 1 });
    let (iw, ih) = (ni[0], if is_2d { ni[1] } else { 1 });
    let (ic, n) = if is_2d { (ni[2], ni[3]) } else { (ni[1], ni[2]) };
    let (ow, oh) = (no[1], if is_2d { no[2] } else { 1 });
    if no[0] != ic * kh * kw {
        return Err(BopsError::ShapeMismatch {
            expected: vec![(ic * kh * kw) as i64],
            got: meta.shape.0.to_vec(),
        });
    }

    let mut out = vec![0.0f32; meta.numel()];
    for b in 0..n {
        for ioh in 0..oh {
            for iow in 0..ow {
                let dst = ((b * oh + ioh) * ow + iow) * no[0];
                for c in 0..ic {
                    for ikh in 0..kh {
                        for ikw in 0..kw {
                            let iiw = (iow * s[0] + ikw * d[0]) as isize - p[0] as isize;
                            let iih = if is_2d {
                                (ioh * s[1] + ikh * d[1]) as isize - p[1] as isize
                            } else {
                                0
                            };
                            if iiw < 0 || iih < 0 || iiw as usize >= iw || iih as usize >= ih {
                                continue;
                            }
                            let from = ((b * ic + c) * ih + iih as usize) * iw + iiw as usize;
                            out[dst + (c * kh + ikh) * kw + ikw] = src.data[from];
                        }
                    }
                }
            }
        }
    }
    Ok(out)
}

// ── Reductions ──────────────────────────────────────────────────────────

fn argsort(inputs: &[NodeInput<'_>], order: SortOrder) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let ne0 = a.shape.0[0] as usize;
    let mut out = Vec::with_capacity(a.data.len());
    let mut idx: Vec<usize> = Vec::with_capacity(ne0);
    for row in a.data.chunks_exact(ne0) {
        idx.clear();
        idx.extend(0..ne0);
        match order {
            SortOrder::Asc => idx.sort_by(|&x, &y| row[x].total_cmp(&row[y])),
            SortOrder::Desc => idx.sort_by(|&x, &y| row[y].total_cmp(&row[x])),
        }
        out.extend(idx.iter().map(|&i| i as f32));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DType;

    fn meta(ne: [i64; 4]) -> TensorMeta {
        TensorMeta::contiguous(DType::F32, Shape::new(ne))
    }

    fn input<'a>(data: &'a [f32], shape: &'a Shape) -> NodeInput<'a> {
        NodeInput {
            data,
            shape,
            dtype: DType::F32,
        }
    }

    #[test]
    fn test_add_broadcast() {
        let a_shape = Shape::new([2, 2, 1, 1]);
        let b_shape = Shape::new([2, 1, 1, 1]);
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Add,
                &[
                    input(&[1.0, 2.0, 3.0, 4.0], &a_shape),
                    input(&[10.0, 20.0], &b_shape),
                ],
                &meta([2, 2, 1, 1]),
            )
            .unwrap();
        assert_eq!(result, vec![11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn test_add_rejects_non_tiling_rhs() {
        let a_shape = Shape::new([3, 1, 1, 1]);
        let b_shape = Shape::new([2, 1, 1, 1]);
        let err = CpuRefBackend.eval_node(
            &OpKind::Add,
            &[input(&[1.0; 3], &a_shape), input(&[1.0; 2], &b_shape)],
            &meta([3, 1, 1, 1]),
        );
        assert!(matches!(err, Err(BopsError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_mul_mat() {
        // a: k=2, m=2 rows (1,2) and (3,4); b: k=2, n=2 rows (5,6) and (7,8).
        let shape = Shape::new([2, 2, 1, 1]);
        let result = CpuRefBackend
            .eval_node(
                &OpKind::MulMat,
                &[
                    input(&[1.0, 2.0, 3.0, 4.0], &shape),
                    input(&[5.0, 6.0, 7.0, 8.0], &shape),
                ],
                &meta([2, 2, 1, 1]),
            )
            .unwrap();
        // out[j][i] = a_i · b_j
        assert_eq!(result, vec![17.0, 39.0, 23.0, 53.0]);
    }

    #[test]
    fn test_mul_mat_id_routes() {
        let ids_shape = Shape::new([2, 1, 1, 1]);
        let shape = Shape::new([1, 1, 1, 1]);
        let result = CpuRefBackend
            .eval_node(
                &OpKind::MulMatId { id: 1 },
                &[
                    input(&[1.0, 0.0], &ids_shape),
                    input(&[3.0], &shape),
                    input(&[10.0], &shape),
                    input(&[100.0], &shape),
                ],
                &meta([1, 1, 1, 1]),
            )
            .unwrap();
        assert_eq!(result, vec![30.0]);
    }

    #[test]
    fn test_mul_mat_id_routes_every_batch() {
        let ids_shape = Shape::new([2, 1, 1, 1]);
        let shape = Shape::new([1, 1, 2, 1]);
        let result = CpuRefBackend
            .eval_node(
                &OpKind::MulMatId { id: 0 },
                &[
                    input(&[1.0, 0.0], &ids_shape),
                    input(&[2.0, 3.0], &shape),
                    input(&[-1.0, -1.0], &shape),
                    input(&[10.0, 20.0], &shape),
                ],
                &meta([1, 1, 2, 1]),
            )
            .unwrap();
        assert_eq!(result, vec![20.0, 60.0]);
    }

    #[test]
    fn test_softmax() {
        let shape = Shape::new([3, 1, 1, 1]);
        let result = CpuRefBackend
            .eval_node(
                &OpKind::SoftMax,
                &[input(&[1.0, 2.0, 3.0], &shape)],
                &meta([3, 1, 1, 1]),
            )
            .unwrap();
        let sum: f32 = result.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(result[2] > result[1] && result[1] > result[0]);
    }

    #[test]
    fn test_diag_mask_inf() {
        let shape = Shape::new([3, 3, 1, 1]);
        let result = CpuRefBackend
            .eval_node(
                &OpKind::DiagMaskInf { n_past: 0 },
                &[input(&[1.0; 9], &shape)],
                &meta([3, 3, 1, 1]),
            )
            .unwrap();
        assert_eq!(result[0], 1.0);
        assert_eq!(result[1], f32::NEG_INFINITY);
        assert_eq!(result[2], f32::NEG_INFINITY);
        assert_eq!(result[4], 1.0);
        assert_eq!(result[5], f32::NEG_INFINITY);
        assert_eq!(result[8], 1.0);
    }

    #[test]
    fn test_get_rows_out_of_range() {
        let a_shape = Shape::new([2, 3, 1, 1]);
        let r_shape = Shape::new([1, 1, 1, 1]);
        let err = CpuRefBackend.eval_node(
            &OpKind::GetRows,
            &[input(&[0.0; 6], &a_shape), input(&[3.0], &r_shape)],
            &meta([2, 1, 1, 1]),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_argsort_desc() {
        let shape = Shape::new([4, 1, 1, 1]);
        let result = CpuRefBackend
            .eval_node(
                &OpKind::ArgSort {
                    order: SortOrder::Desc,
                },
                &[input(&[0.5, 2.0, -1.0, 1.0], &shape)],
                &meta([4, 1, 1, 1]),
            )
            .unwrap();
        assert_eq!(result, vec![1.0, 3.0, 0.0, 2.0]);
    }

    #[test]
    fn test_rope_position_zero_is_identity() {
        let shape = Shape::new([4, 1, 1, 1]);
        let pos_shape = Shape::new([1, 1, 1, 1]);
        let x = [1.0, 2.0, 3.0, 4.0];
        for mode in [0, 2] {
            let result = CpuRefBackend
                .eval_node(
                    &OpKind::Rope {
                        n_dims: 4,
                        mode,
                        n_ctx: 512,
                        freq_base: 10000.0,
                    },
                    &[input(&x, &shape), input(&[0.0], &pos_shape)],
                    &meta([4, 1, 1, 1]),
                )
                .unwrap();
            assert_eq!(result, x.to_vec());
        }
    }

    #[test]
    fn test_im2col_1d() {
        // Input [IW=4, IC=1, N=1], kernel [KW=2, IC=1], stride 1, no padding.
        let kernel = Shape::new([2, 1, 1, 1]);
        let src = Shape::new([4, 1, 1, 1]);
        let result = CpuRefBackend
            .eval_node(
                &OpKind::Im2Col {
                    s0: 1,
                    s1: 0,
                    p0: 0,
                    p1: 0,
                    d0: 1,
                    d1: 0,
                    is_2d: false,
                },
                &[input(&[0.0; 2], &kernel), input(&[1.0, 2.0, 3.0, 4.0], &src)],
                &meta([2, 3, 1, 1]),
            )
            .unwrap();
        assert_eq!(result, vec![1.0, 2.0, 2.0, 3.0, 3.0, 4.0]);
    }

    #[test]
    fn test_alibi_slopes() {
        let slopes = alibi_slopes(8, 8.0, 8);
        assert!((slopes[0] - 0.5).abs() < 1e-6);
        assert!((slopes[7] - 2.0f32.powi(-8)).abs() < 1e-9);
    }

    #[test]
    fn test_unary_values() {
        assert_eq!(unary(UnaryOp::Sgn, -3.0), -1.0);
        assert_eq!(unary(UnaryOp::Step, 0.0), 0.0);
        assert_eq!(unary(UnaryOp::Leaky, -1.0), -0.1);
        assert!((unary(UnaryOp::Silu, 1.0) - 0.731_058_6).abs() < 1e-6);
    }
}
