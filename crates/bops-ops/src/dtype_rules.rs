//! Input and output dtype rules per op.
//!
//! Quantized tensors may only feed the ops that decode them row by row
//! (the weight side of matrix multiplies and row gathers). No op produces a
//! quantized result.

use bops_core::DType;
use bops_core::graph::OpKind;

use crate::shape_inference::ShapeError;

/// Result dtype of `op` given its input dtypes.
pub fn output_dtype(op: &OpKind, inputs: &[DType]) -> DType {
    let first = inputs.first().copied().unwrap_or(DType::F32);
    match op {
        OpKind::GetRows | OpKind::MulMat | OpKind::MulMatId { .. } => DType::F32,
        OpKind::ArgSort { .. } => DType::I32,
        OpKind::Im2Col { .. } => DType::F16,
        OpKind::Cpy => inputs.get(1).copied().unwrap_or(first),
        _ => first,
    }
}

/// Whether input `idx` of `op` may hold `dtype`.
pub fn accepts(op: &OpKind, idx: usize, dtype: DType) -> bool {
    match (op, idx) {
        (OpKind::GetRows, 0) => dtype != DType::I32,
        (OpKind::GetRows, 1) | (OpKind::Rope { .. }, 1) | (OpKind::MulMatId { .. }, 0) => {
            dtype == DType::I32
        }
        (OpKind::MulMat, 0) => dtype != DType::I32,
        (OpKind::MulMat, 1) | (OpKind::MulMatId { .. }, 1) => dtype == DType::F32,
        (OpKind::MulMatId { .. }, _) => dtype != DType::I32,
        (OpKind::Rope { .. }, 0) | (OpKind::Cpy, _) | (OpKind::Dup, _) | (OpKind::Cont, _) => {
            is_float(dtype)
        }
        (OpKind::Im2Col { .. }, 0) => is_float(dtype),
        (OpKind::Im2Col { .. }, _) => dtype == DType::F32,
        // Views only reinterpret strides.
        (op, _) if op.is_view() => true,
        _ => dtype == DType::F32,
    }
}

/// Check every input dtype of `op`.
pub fn check_inputs(op: &OpKind, inputs: &[DType]) -> Result<(), ShapeError> {
    for (idx, &dtype) in inputs.iter().enumerate() {
        if !accepts(op, idx, dtype) {
            return Err(ShapeError::BadDType {
                op: op.desc(),
                idx,
                dtype,
            });
        }
    }
    Ok(())
}

/// Check whether a dtype is an unquantized floating-point type.
pub fn is_float(dt: DType) -> bool {
    matches!(dt, DType::F32 | DType::F16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bops_core::graph::{SortOrder, UnaryOp};

    #[test]
    fn test_output_dtypes() {
        assert_eq!(output_dtype(&OpKind::GetRows, &[DType::F16, DType::I32]), DType::F32);
        assert_eq!(
            output_dtype(&OpKind::ArgSort { order: SortOrder::Asc }, &[DType::F32]),
            DType::I32
        );
        assert_eq!(output_dtype(&OpKind::Cpy, &[DType::F32, DType::F16]), DType::F16);
        assert_eq!(output_dtype(&OpKind::MulMat, &[DType::Q4_0, DType::F32]), DType::F32);
        assert_eq!(output_dtype(&OpKind::Unary(UnaryOp::Abs), &[DType::F32]), DType::F32);
    }

    #[test]
    fn test_never_outputs_quantized() {
        let ops = [
            OpKind::GetRows,
            OpKind::MulMat,
            OpKind::MulMatId { id: 0 },
            OpKind::Cpy,
            OpKind::SumRows,
        ];
        for op in &ops {
            for &q in &DType::QUANTIZED {
                if check_inputs(op, &[q, DType::F32]).is_ok() {
                    assert!(!output_dtype(op, &[q, DType::F32]).is_quantized(), "{op:?}");
                }
            }
        }
    }

    #[test]
    fn test_quantized_weights_accepted() {
        assert!(check_inputs(&OpKind::MulMat, &[DType::Q5_1, DType::F32]).is_ok());
        assert!(check_inputs(&OpKind::GetRows, &[DType::Q8_0, DType::I32]).is_ok());
        assert!(check_inputs(&OpKind::MulMat, &[DType::F32, DType::Q4_0]).is_err());
        assert!(check_inputs(&OpKind::SoftMax, &[DType::Q4_0]).is_err());
    }

    #[test]
    fn test_index_inputs_must_be_i32() {
        assert!(matches!(
            check_inputs(&OpKind::GetRows, &[DType::F32, DType::F32]),
            Err(ShapeError::BadDType { idx: 1, .. })
        ));
        let ids = [DType::I32, DType::F32, DType::Q4_0, DType::Q4_0];
        assert!(check_inputs(&OpKind::MulMatId { id: 1 }, &ids).is_ok());
    }
}
