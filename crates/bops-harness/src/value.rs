//! Logical element access for test tensors.
//!
//! The read path decodes backend output into `f64` for comparison and only
//! understands the dtypes an op may produce. The write path encodes uniform
//! random `f32` data into any leaf dtype, quantizing whole blocks.

use bops_core::quants::quantize_chunk;
use bops_core::{DType, Graph, GraphBuffer, NodeId, TensorMeta};
use half::f16;
use rand::Rng;

use crate::{HarnessError, Result};

/// Decode a tensor into logical order (dim 3 outermost, dim 0 innermost).
///
/// Element addresses come from the per-dimension byte strides, so transposed
/// and permuted views read correctly.
pub fn tensor_to_f64(meta: &TensorMeta, bytes: &[u8]) -> Result<Vec<f64>> {
    let size = match meta.dtype {
        DType::F32 | DType::I32 => 4,
        DType::F16 => 2,
        other => {
            return Err(HarnessError::Malformed(format!(
                "{other} output cannot be compared"
            )));
        }
    };
    let ne = meta.shape.0.map(|d| d as usize);
    let nb = meta.nb;
    let mut out = Vec::with_capacity(meta.numel());
    for i3 in 0..ne[3] {
        for i2 in 0..ne[2] {
            for i1 in 0..ne[1] {
                for i0 in 0..ne[0] {
                    let off = i3 * nb[3] + i2 * nb[2] + i1 * nb[1] + i0 * nb[0];
                    let raw = bytes.get(off..off + size).ok_or_else(|| {
                        HarnessError::Malformed(format!(
                            "element at byte {off} outside {} byte tensor",
                            bytes.len()
                        ))
                    })?;
                    out.push(match meta.dtype {
                        DType::F16 => f16::from_le_bytes([raw[0], raw[1]]).to_f64(),
                        DType::I32 => i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
                        _ => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
                    });
                }
            }
        }
    }
    Ok(out)
}

/// Fill a leaf with values drawn uniformly from `[min, max]`.
pub fn init_tensor_uniform<R: Rng>(
    graph: &Graph,
    id: NodeId,
    buffer: &mut GraphBuffer,
    rng: &mut R,
    min: f32,
    max: f32,
) -> Result<()> {
    let meta = graph.meta(id)?;
    let n = meta.numel();
    let data: Vec<f32> = (0..n).map(|_| rng.random_range(min..=max)).collect();
    let bytes = match meta.dtype {
        DType::F32 => data.iter().flat_map(|v| v.to_le_bytes()).collect(),
        dtype if dtype == DType::F16 || dtype.is_quantized() => {
            if n % dtype.block_size() != 0 {
                return Err(HarnessError::Malformed(format!(
                    "{n} elements do not fill whole {dtype} blocks"
                )));
            }
            quantize_chunk(dtype, &data)?
        }
        other => {
            return Err(HarnessError::Malformed(format!(
                "cannot fill {other} tensor with uniform values"
            )));
        }
    };
    buffer.set_tensor(id, 0, &bytes)?;
    Ok(())
}

/// Write integer data into an I32 leaf.
pub fn set_i32(graph: &Graph, id: NodeId, buffer: &mut GraphBuffer, values: &[i32]) -> Result<()> {
    let meta = graph.meta(id)?;
    if meta.dtype != DType::I32 || meta.numel() != values.len() {
        return Err(HarnessError::Malformed(format!(
            "{} i32 values for {} tensor {}",
            values.len(),
            meta.dtype,
            meta.shape
        )));
    }
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    buffer.set_tensor(id, 0, &bytes)?;
    Ok(())
}

/// Overwrite row `row` (counted over dims 1..3) of a packed F32 leaf.
pub fn set_row_f32(
    graph: &Graph,
    id: NodeId,
    buffer: &mut GraphBuffer,
    row: usize,
    values: &[f32],
) -> Result<()> {
    let meta = graph.meta(id)?;
    if meta.dtype != DType::F32 || meta.shape.0[0] as usize != values.len() {
        return Err(HarnessError::Malformed(format!(
            "row of {} f32 values for {} tensor {}",
            values.len(),
            meta.dtype,
            meta.shape
        )));
    }
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    buffer.set_tensor(id, row * meta.nb[1], &bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bops_core::quants::max_block_error;
    use bops_core::tensor::read_f32;
    use bops_core::{OpKind, Shape};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn leaf(dtype: DType, ne: [i64; 4]) -> (Graph, NodeId, GraphBuffer) {
        let mut g = Graph::new();
        let id = g.new_tensor(dtype, Shape::new(ne));
        let buf = GraphBuffer::host(&g).unwrap();
        (g, id, buf)
    }

    #[test]
    fn test_f32_roundtrip_exact() {
        let (g, id, mut buf) = leaf(DType::F32, [4, 2, 1, 1]);
        let mut rng = StdRng::seed_from_u64(1);
        init_tensor_uniform(&g, id, &mut buf, &mut rng, -1.0, 1.0).unwrap();
        let meta = g.meta(id).unwrap();
        let raw = read_f32(meta, buf.get_tensor(id).unwrap()).unwrap();
        let wide = tensor_to_f64(meta, buf.get_tensor(id).unwrap()).unwrap();
        assert_eq!(wide.len(), 8);
        for (a, b) in raw.iter().zip(&wide) {
            assert_eq!(*a as f64, *b);
            assert!((-1.0..=1.0).contains(b));
        }
    }

    #[test]
    fn test_f16_decoded_through_half() {
        let (g, id, mut buf) = leaf(DType::F16, [3, 1, 1, 1]);
        let bytes: Vec<u8> = [0.5f32, -2.0, 1024.0]
            .iter()
            .flat_map(|&v| f16::from_f32(v).to_le_bytes())
            .collect();
        buf.set_tensor(id, 0, &bytes).unwrap();
        let out = tensor_to_f64(g.meta(id).unwrap(), buf.get_tensor(id).unwrap()).unwrap();
        assert_eq!(out, vec![0.5, -2.0, 1024.0]);
    }

    #[test]
    fn test_i32_signed() {
        let (g, id, mut buf) = leaf(DType::I32, [3, 1, 1, 1]);
        set_i32(&g, id, &mut buf, &[7, -3, 0]).unwrap();
        let out = tensor_to_f64(g.meta(id).unwrap(), buf.get_tensor(id).unwrap()).unwrap();
        assert_eq!(out, vec![7.0, -3.0, 0.0]);
    }

    #[test]
    fn test_strided_read_follows_nb() {
        let mut g = Graph::new();
        let a = g.new_tensor(DType::F32, Shape::new([3, 2, 1, 1]));
        let packed = g.meta(a).unwrap().clone();
        let t_meta = TensorMeta {
            dtype: DType::F32,
            shape: Shape::new([2, 3, 1, 1]),
            nb: [packed.nb[1], packed.nb[0], packed.nb[2], packed.nb[3]],
        };
        let t = g.add_view(OpKind::Transpose, a, t_meta, 0).unwrap();
        let mut buf = GraphBuffer::host(&g).unwrap();
        let bytes: Vec<u8> = (0..6).flat_map(|v| (v as f32).to_le_bytes()).collect();
        buf.set_tensor(a, 0, &bytes).unwrap();
        let out = tensor_to_f64(g.meta(t).unwrap(), buf.get_tensor(t).unwrap()).unwrap();
        assert_eq!(out, vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    }

    #[test]
    fn test_quantized_read_is_malformed() {
        let (g, id, buf) = leaf(DType::Q4_0, [32, 1, 1, 1]);
        let err = tensor_to_f64(g.meta(id).unwrap(), buf.get_tensor(id).unwrap());
        assert!(matches!(err, Err(HarnessError::Malformed(_))));
    }

    #[test]
    fn test_quantized_write_within_bound() {
        let (g, id, mut buf) = leaf(DType::Q5_1, [64, 3, 1, 1]);
        let mut rng = StdRng::seed_from_u64(9);
        init_tensor_uniform(&g, id, &mut buf, &mut rng, -1.0, 1.0).unwrap();
        let decoded = read_f32(g.meta(id).unwrap(), buf.get_tensor(id).unwrap()).unwrap();
        // Re-draw the same source values.
        let mut rng = StdRng::seed_from_u64(9);
        let src: Vec<f32> = (0..192).map(|_| rng.random_range(-1.0f32..=1.0)).collect();
        for (s, d) in src.chunks(32).zip(decoded.chunks(32)) {
            let bound = max_block_error(DType::Q5_1, s);
            for (a, b) in s.iter().zip(d) {
                assert!((a - b).abs() <= bound, "{a} vs {b} (bound {bound})");
            }
        }
    }

    #[test]
    fn test_uniform_i32_is_malformed() {
        let (g, id, mut buf) = leaf(DType::I32, [4, 1, 1, 1]);
        let mut rng = StdRng::seed_from_u64(0);
        let err = init_tensor_uniform(&g, id, &mut buf, &mut rng, -1.0, 1.0);
        assert!(matches!(err, Err(HarnessError::Malformed(_))));
    }

    #[test]
    fn test_set_row_offsets_by_row_stride() {
        let (g, id, mut buf) = leaf(DType::F32, [2, 3, 1, 1]);
        set_row_f32(&g, id, &mut buf, 2, &[5.0, 6.0]).unwrap();
        let out = tensor_to_f64(g.meta(id).unwrap(), buf.get_tensor(id).unwrap()).unwrap();
        assert_eq!(out, vec![0.0, 0.0, 0.0, 0.0, 5.0, 6.0]);
        assert!(set_row_f32(&g, id, &mut buf, 0, &[1.0]).is_err());
    }
}
