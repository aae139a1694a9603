//! Shape inference for graph ops.
//!
//! Given an `OpKind` and input shapes, computes the output shape. This is used
//! by the graph builder to set `TensorMeta` on newly created nodes.

use bops_core::graph::OpKind;
use bops_core::{BopsError, DType, Shape};

use crate::broadcast::can_repeat;

/// Error returned when an op cannot be built from its inputs.
#[derive(Debug, thiserror::Error)]
pub enum ShapeError {
    #[error("shape mismatch: {0}")]
    Mismatch(String),

    #[error("{op} expects input {idx}")]
    MissingInput { op: &'static str, idx: usize },

    #[error("{src} cannot be repeated into {dst}")]
    NotRepeatable { src: Shape, dst: Shape },

    #[error("mul_mat inner dimensions mismatch: {k1} vs {k2}")]
    MatmulMismatch { k1: i64, k2: i64 },

    #[error("{op} does not accept {dtype} input {idx}")]
    BadDType {
        op: &'static str,
        idx: usize,
        dtype: DType,
    },

    #[error("{0} has an empty dimension")]
    Empty(Shape),

    #[error("{dtype} rows of {ne0} elements are not whole blocks")]
    PartialBlock { dtype: DType, ne0: i64 },

    #[error(transparent)]
    Graph(#[from] BopsError),
}

fn input<'a>(op: &OpKind, inputs: &[&'a Shape], idx: usize) -> Result<&'a Shape, ShapeError> {
    inputs.get(idx).copied().ok_or(ShapeError::MissingInput {
        op: op.desc(),
        idx,
    })
}

/// Output size of a convolution-style sliding window.
pub fn conv_output_size(ins: i64, ks: i64, s: usize, p: usize, d: usize) -> i64 {
    (ins + 2 * p as i64 - d as i64 * (ks - 1) - 1) / s as i64 + 1
}

/// Infer the output shape for a given op and input shapes.
///
/// `Repeat` takes the target shape as its second entry. `Reshape` has no
/// shape rule of its own; the builder supplies the new dims directly.
pub fn infer_shape(op: &OpKind, inputs: &[&Shape]) -> Result<Shape, ShapeError> {
    match op {
        // Shape-preserving ops.
        OpKind::Unary(_)
        | OpKind::Sqr
        | OpKind::Clamp { .. }
        | OpKind::Dup
        | OpKind::Cont
        | OpKind::Norm { .. }
        | OpKind::RmsNorm { .. }
        | OpKind::DiagMaskInf { .. }
        | OpKind::SoftMax
        | OpKind::Alibi { .. }
        | OpKind::ArgSort { .. } => Ok(*input(op, inputs, 0)?),

        OpKind::Input => Err(ShapeError::Mismatch("leaves have no inferred shape".into())),

        // The rhs is tiled over the lhs.
        OpKind::Add | OpKind::Mul | OpKind::Div => {
            let a = input(op, inputs, 0)?;
            let b = input(op, inputs, 1)?;
            if !can_repeat(b, a) {
                return Err(ShapeError::NotRepeatable { src: *b, dst: *a });
            }
            Ok(*a)
        }

        OpKind::Scale => {
            let a = input(op, inputs, 0)?;
            let s = input(op, inputs, 1)?;
            if s.numel() != 1 {
                return Err(ShapeError::Mismatch(format!("scale factor {s} is not a scalar")));
            }
            Ok(*a)
        }

        OpKind::Repeat => {
            let a = input(op, inputs, 0)?;
            let target = input(op, inputs, 1)?;
            if !can_repeat(a, target) {
                return Err(ShapeError::NotRepeatable {
                    src: *a,
                    dst: *target,
                });
            }
            Ok(*target)
        }

        OpKind::Cpy => {
            let a = input(op, inputs, 0)?;
            let b = input(op, inputs, 1)?;
            if a.numel() != b.numel() {
                return Err(ShapeError::Mismatch(format!(
                    "cannot copy {a} into {b}: element counts differ"
                )));
            }
            Ok(*b)
        }

        OpKind::GetRows => {
            let a = input(op, inputs, 0)?;
            let rows = input(op, inputs, 1)?;
            if rows.nrows() != 1 {
                return Err(ShapeError::Mismatch(format!("row indices {rows} must be 1-D")));
            }
            Ok(Shape::new([a.0[0], rows.0[0], a.0[2], a.0[3]]))
        }

        OpKind::Concat => {
            let a = input(op, inputs, 0)?;
            let b = input(op, inputs, 1)?;
            if a.0[0] != b.0[0] || a.0[1] != b.0[1] || a.0[3] != b.0[3] {
                return Err(ShapeError::Mismatch(format!(
                    "cannot concat {a} and {b} along dim 2"
                )));
            }
            Ok(Shape::new([a.0[0], a.0[1], a.0[2] + b.0[2], a.0[3]]))
        }

        // [k, m, a2, a3] x [k, n, b2, b3] → [m, n, b2, b3]
        OpKind::MulMat => {
            let a = input(op, inputs, 0)?;
            let b = input(op, inputs, 1)?;
            mul_mat_shape(a, b)
        }

        // inputs: [ids, b, a_0, .., a_n]
        OpKind::MulMatId { id } => {
            let ids = input(op, inputs, 0)?;
            let b = input(op, inputs, 1)?;
            let a0 = input(op, inputs, 2)?;
            let n_as = inputs.len() - 2;
            if ids.0[0] as usize != n_as || *id >= n_as {
                return Err(ShapeError::Mismatch(format!(
                    "routing slot {id} with ids {ids} over {n_as} matrices"
                )));
            }
            if let Some(other) = inputs[2..].iter().find(|s| **s != a0) {
                return Err(ShapeError::Mismatch(format!(
                    "routed matrices differ: {a0} vs {other}"
                )));
            }
            mul_mat_shape(a0, b)
        }

        OpKind::Rope { n_dims, .. } => {
            let a = input(op, inputs, 0)?;
            let pos = input(op, inputs, 1)?;
            if *n_dims as i64 > a.0[0] || n_dims % 2 != 0 {
                return Err(ShapeError::Mismatch(format!(
                    "n_dims {n_dims} must be even and fit in {a}"
                )));
            }
            if pos.0[0] != a.0[2] {
                return Err(ShapeError::Mismatch(format!(
                    "{pos} positions for {} rows of {a}",
                    a.0[2]
                )));
            }
            Ok(*a)
        }

        OpKind::Im2Col {
            s0,
            s1,
            p0,
            p1,
            d0,
            d1,
            is_2d,
        } => {
            let kernel = input(op, inputs, 0)?;
            let src = input(op, inputs, 1)?;
            let ow = conv_output_size(src.0[0], kernel.0[0], *s0, *p0, *d0);
            if *is_2d {
                if kernel.0[2] != src.0[2] {
                    return Err(ShapeError::Mismatch(format!(
                        "kernel {kernel} and input {src} channel counts differ"
                    )));
                }
                let oh = conv_output_size(src.0[1], kernel.0[1], *s1, *p1, *d1);
                Ok(Shape::new([
                    src.0[2] * kernel.0[1] * kernel.0[0],
                    ow,
                    oh,
                    src.0[3],
                ]))
            } else {
                if kernel.0[1] != src.0[1] {
                    return Err(ShapeError::Mismatch(format!(
                        "kernel {kernel} and input {src} channel counts differ"
                    )));
                }
                Ok(Shape::new([src.0[1] * kernel.0[0], ow, src.0[2], 1]))
            }
        }

        OpKind::SumRows => {
            let a = input(op, inputs, 0)?;
            Ok(Shape::new([1, a.0[1], a.0[2], a.0[3]]))
        }

        OpKind::Transpose => {
            let a = input(op, inputs, 0)?;
            Ok(Shape::new([a.0[1], a.0[0], a.0[2], a.0[3]]))
        }

        // Source dim i lands at position axes[i].
        OpKind::Permute { axes } => {
            let a = input(op, inputs, 0)?;
            let mut seen = [false; 4];
            let mut ne = [1i64; 4];
            for (i, &ax) in axes.iter().enumerate() {
                if ax >= 4 || seen[ax] {
                    return Err(ShapeError::Mismatch(format!("invalid permutation {axes:?}")));
                }
                seen[ax] = true;
                ne[ax] = a.0[i];
            }
            Ok(Shape::new(ne))
        }

        OpKind::Reshape => Err(ShapeError::Mismatch(
            "reshape takes its dims from the caller".into(),
        )),
    }
}

fn mul_mat_shape(a: &Shape, b: &Shape) -> Result<Shape, ShapeError> {
    if a.0[0] != b.0[0] {
        return Err(ShapeError::MatmulMismatch {
            k1: a.0[0],
            k2: b.0[0],
        });
    }
    if b.0[2] % a.0[2] != 0 || b.0[3] % a.0[3] != 0 {
        return Err(ShapeError::NotRepeatable { src: *a, dst: *b });
    }
    Ok(Shape::new([a.0[1], b.0[1], b.0[2], b.0[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bops_core::graph::UnaryOp;

    fn s(ne: [i64; 4]) -> Shape {
        Shape::new(ne)
    }

    #[test]
    fn test_unary_preserves() {
        let a = s([128, 10, 10, 10]);
        assert_eq!(infer_shape(&OpKind::Unary(UnaryOp::Gelu), &[&a]).unwrap(), a);
    }

    #[test]
    fn test_binary_bcast() {
        let a = s([32, 10, 10, 10]);
        let b = s([16, 10, 10, 10]);
        assert_eq!(infer_shape(&OpKind::Add, &[&a, &b]).unwrap(), a);
        assert!(matches!(
            infer_shape(&OpKind::Add, &[&b, &a]),
            Err(ShapeError::NotRepeatable { .. })
        ));
    }

    #[test]
    fn test_mul_mat_broadcast_batch() {
        let a = s([256, 16, 10, 1]);
        let b = s([256, 1, 20, 2]);
        assert_eq!(
            infer_shape(&OpKind::MulMat, &[&a, &b]).unwrap(),
            s([16, 1, 20, 2])
        );
    }

    #[test]
    fn test_mul_mat_k_mismatch() {
        let a = s([256, 16, 1, 1]);
        let b = s([128, 16, 1, 1]);
        assert!(matches!(
            infer_shape(&OpKind::MulMat, &[&a, &b]),
            Err(ShapeError::MatmulMismatch { k1: 256, k2: 128 })
        ));
    }

    #[test]
    fn test_mul_mat_id() {
        let ids = s([4, 1, 1, 1]);
        let b = s([256, 16, 1, 1]);
        let a = s([256, 16, 1, 1]);
        let op = OpKind::MulMatId { id: 3 };
        assert_eq!(
            infer_shape(&op, &[&ids, &b, &a, &a, &a, &a]).unwrap(),
            s([16, 16, 1, 1])
        );
        let op = OpKind::MulMatId { id: 4 };
        assert!(infer_shape(&op, &[&ids, &b, &a, &a, &a, &a]).is_err());
    }

    #[test]
    fn test_im2col_shapes() {
        let op = |is_2d| OpKind::Im2Col {
            s0: 1,
            s1: 1,
            p0: 1,
            p1: 1,
            d0: 1,
            d1: 1,
            is_2d,
        };
        let kernel = s([3, 3, 3, 1]);
        let src = s([10, 10, 3, 1]);
        assert_eq!(
            infer_shape(&op(true), &[&kernel, &src]).unwrap(),
            s([27, 10, 10, 1])
        );
        let kernel = s([3, 3, 1, 1]);
        let src = s([10, 3, 1, 1]);
        assert_eq!(
            infer_shape(&op(false), &[&kernel, &src]).unwrap(),
            s([9, 10, 1, 1])
        );
    }

    #[test]
    fn test_sum_rows_and_concat() {
        let a = s([10, 10, 10, 10]);
        assert_eq!(infer_shape(&OpKind::SumRows, &[&a]).unwrap(), s([1, 10, 10, 10]));
        assert_eq!(
            infer_shape(&OpKind::Concat, &[&a, &a]).unwrap(),
            s([10, 10, 20, 10])
        );
    }

    #[test]
    fn test_permute() {
        let a = s([2, 3, 4, 5]);
        let op = OpKind::Permute { axes: [1, 0, 3, 2] };
        assert_eq!(infer_shape(&op, &[&a]).unwrap(), s([3, 2, 5, 4]));
        let bad = OpKind::Permute { axes: [0, 0, 1, 2] };
        assert!(infer_shape(&bad, &[&a]).is_err());
    }

    #[test]
    fn test_missing_input() {
        assert!(matches!(
            infer_shape(&OpKind::Add, &[&s([1, 1, 1, 1])]),
            Err(ShapeError::MissingInput { op: "ADD", idx: 1 })
        ));
    }

    #[test]
    fn test_conv_output_size() {
        assert_eq!(conv_output_size(10, 3, 1, 0, 1), 8);
        assert_eq!(conv_output_size(10, 3, 2, 1, 1), 5);
        assert_eq!(conv_output_size(10, 3, 1, 0, 2), 6);
    }
}
