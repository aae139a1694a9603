//! Tiled CPU backend.
//!
//! Matrix multiplies and row reductions are written independently of the
//! reference kernels: matmuls walk 4x4 output tiles with eight partial sums
//! per dot product, and reductions accumulate in `f64`. Every other op
//! forwards to the reference kernels.

use bops_core::backend::{Backend, NodeInput};
use bops_core::cpu_kernels::{CpuRefBackend, require_input};
use bops_core::graph::{Graph, Node, OpKind, TensorMeta};
use bops_core::{BopsError, Result};
use tracing::trace;

const TILE: usize = 4;
const LANES: usize = 8;

/// CPU backend with its own matmul and reduction kernels.
#[derive(Debug, Default)]
pub struct TiledCpuBackend;

impl Backend for TiledCpuBackend {
    fn name(&self) -> &str {
        "CPU-tiled"
    }

    fn supports_op(&self, _graph: &Graph, node: &Node) -> bool {
        !matches!(node.op, OpKind::Alibi { .. } | OpKind::Im2Col { .. })
    }

    fn eval_node(
        &self,
        op: &OpKind,
        inputs: &[NodeInput<'_>],
        output_meta: &TensorMeta,
    ) -> Result<Vec<f32>> {
        match op {
            OpKind::MulMat => {
                let a = require_input(inputs, 0)?;
                let b = require_input(inputs, 1)?;
                mul_mat_tiled(a, b)
            }
            OpKind::MulMatId { id } => {
                let ids = require_input(inputs, 0)?;
                let b = require_input(inputs, 1)?;
                let routed = ids.data.get(*id).copied().ok_or_else(|| {
                    BopsError::InvalidArgument(format!("routing slot {id} out of range"))
                })?;
                let n_as = inputs.len().saturating_sub(2);
                if routed < 0.0 || routed as usize >= n_as {
                    return Err(BopsError::InvalidArgument(format!(
                        "routing id {routed} outside [0, {n_as})"
                    )));
                }
                mul_mat_tiled(require_input(inputs, 2 + routed as usize)?, b)
            }
            OpKind::SoftMax => rows_map(inputs, softmax_row),
            OpKind::Norm { eps } => rows_map(inputs, |row, out| norm_row(row, out, *eps)),
            OpKind::RmsNorm { eps } => rows_map(inputs, |row, out| rms_norm_row(row, out, *eps)),
            OpKind::SumRows => {
                let a = require_input(inputs, 0)?;
                let ne0 = row_len(a)?;
                Ok(a.data
                    .chunks_exact(ne0)
                    .map(|row| row.iter().map(|&x| x as f64).sum::<f64>() as f32)
                    .collect())
            }
            _ => CpuRefBackend.eval_node(op, inputs, output_meta),
        }
    }
}

fn row_len(a: &NodeInput<'_>) -> Result<usize> {
    match a.shape.0[0] {
        n if n > 0 => Ok(n as usize),
        n => Err(BopsError::InvalidArgument(format!("row length {n}"))),
    }
}

fn rows_map<F>(inputs: &[NodeInput<'_>], f: F) -> Result<Vec<f32>>
where
    F: Fn(&[f32], &mut [f32]),
{
    let a = require_input(inputs, 0)?;
    let ne0 = row_len(a)?;
    let mut out = vec![0.0f32; a.data.len()];
    for (row, dst) in a.data.chunks_exact(ne0).zip(out.chunks_exact_mut(ne0)) {
        f(row, dst);
    }
    Ok(out)
}

// ── Reductions ──────────────────────────────────────────────────────────

fn softmax_row(row: &[f32], out: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f64;
    for (o, &x) in out.iter_mut().zip(row) {
        let e = ((x - max) as f64).exp();
        *o = e as f32;
        sum += e;
    }
    let inv = (1.0 / sum) as f32;
    out.iter_mut().for_each(|o| *o *= inv);
}

fn norm_row(row: &[f32], out: &mut [f32], eps: f32) {
    let n = row.len() as f64;
    let mean = row.iter().map(|&x| x as f64).sum::<f64>() / n;
    let var = row.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;
    let scale = 1.0 / (var + eps as f64).sqrt();
    for (o, &x) in out.iter_mut().zip(row) {
        *o = ((x as f64 - mean) * scale) as f32;
    }
}

fn rms_norm_row(row: &[f32], out: &mut [f32], eps: f32) {
    let mean_sq = row.iter().map(|&x| (x as f64).powi(2)).sum::<f64>() / row.len() as f64;
    let scale = (1.0 / (mean_sq + eps as f64).sqrt()) as f32;
    for (o, &x) in out.iter_mut().zip(row) {
        *o = x * scale;
    }
}

// ── Linear algebra ──────────────────────────────────────────────────────

fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; LANES];
    let chunks = a.len() / LANES;
    for c in 0..chunks {
        let (x, y) = (&a[c * LANES..][..LANES], &b[c * LANES..][..LANES]);
        for l in 0..LANES {
            acc[l] += x[l] * y[l];
        }
    }
    let mut tail = 0.0f32;
    for p in chunks * LANES..a.len() {
        tail += a[p] * b[p];
    }
    acc.iter().sum::<f32>() + tail
}

/// `a` is `[k, m, a2, a3]`, `b` is `[k, n, b2, b3]`, result is `[m, n, b2, b3]`.
fn mul_mat_tiled(a: &NodeInput<'_>, b: &NodeInput<'_>) -> Result<Vec<f32>> {
    let na = a.shape.0.map(|d| d as usize);
    let nb = b.shape.0.map(|d| d as usize);
    if na[0] != nb[0] || nb[2] % na[2] != 0 || nb[3] % na[3] != 0 {
        return Err(BopsError::ShapeMismatch {
            expected: a.shape.0.to_vec(),
            got: b.shape.0.to_vec(),
        });
    }
    let (k, m, n) = (na[0], na[1], nb[1]);
    let (r2, r3) = (nb[2] / na[2], nb[3] / na[3]);
    trace!(k, m, n, "tiled mul_mat");

    let mut out = vec![0.0f32; m * n * nb[2] * nb[3]];
    for i3 in 0..nb[3] {
        for i2 in 0..nb[2] {
            let a_mat = ((i3 / r3) * na[2] + i2 / r2) * m * k;
            let b_mat = (i3 * nb[2] + i2) * n * k;
            let o_mat = (i3 * nb[2] + i2) * m * n;
            for j0 in (0..n).step_by(TILE) {
                for i0 in (0..m).step_by(TILE) {
                    for j in j0..(j0 + TILE).min(n) {
                        let b_row = &b.data[b_mat + j * k..][..k];
                        for i in i0..(i0 + TILE).min(m) {
                            let a_row = &a.data[a_mat + i * k..][..k];
                            out[o_mat + j * m + i] = dot(a_row, b_row);
                        }
                    }
                }
            }
        }
    }
    Ok(out)
}
