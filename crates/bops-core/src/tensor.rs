//! Strided access to tensor storage.
//!
//! Backends exchange dense `f32` data in logical order (dim 0 fastest); the
//! storage behind a node may be strided, transposed or block-quantized. These
//! helpers convert between the two using the byte strides in `TensorMeta`.

use half::f16;

use crate::graph::TensorMeta;
use crate::quants;
use crate::types::DType;
use crate::{BopsError, Result};

/// Byte offset of every row (`i1`, `i2`, `i3`) in traversal order i3, i2, i1.
pub fn row_offsets(meta: &TensorMeta) -> impl Iterator<Item = usize> + '_ {
    let [_, ne1, ne2, ne3] = meta.shape.0;
    let nb = meta.nb;
    (0..ne3 as usize).flat_map(move |i3| {
        (0..ne2 as usize).flat_map(move |i2| {
            (0..ne1 as usize).map(move |i1| i1 * nb[1] + i2 * nb[2] + i3 * nb[3])
        })
    })
}

fn check_span(meta: &TensorMeta, len: usize) -> Result<()> {
    let need = meta.nbytes();
    if len < need {
        return Err(BopsError::OutOfBounds {
            offset: 0,
            len: need,
            size: len,
        });
    }
    Ok(())
}

fn check_block_layout(meta: &TensorMeta) -> Result<()> {
    let blck = meta.dtype.block_size();
    if blck > 1 && (meta.nb[0] != meta.dtype.type_size() || meta.shape.0[0] as usize % blck != 0) {
        return Err(BopsError::InvalidArgument(format!(
            "{} tensor {} must hold whole packed blocks along dim 0",
            meta.dtype, meta.shape
        )));
    }
    Ok(())
}

/// Decode every logical element of a tensor, whatever its storage dtype.
pub fn read_f32(meta: &TensorMeta, bytes: &[u8]) -> Result<Vec<f32>> {
    check_span(meta, bytes.len())?;
    check_block_layout(meta)?;
    let ne0 = meta.shape.0[0] as usize;
    let nb0 = meta.nb[0];
    let mut out = vec![0.0f32; meta.numel()];
    for (row, off) in out.chunks_exact_mut(ne0.max(1)).zip(row_offsets(meta)) {
        match meta.dtype {
            DType::F32 => {
                for (i0, v) in row.iter_mut().enumerate() {
                    let p = off + i0 * nb0;
                    *v = f32::from_le_bytes([bytes[p], bytes[p + 1], bytes[p + 2], bytes[p + 3]]);
                }
            }
            DType::F16 => {
                for (i0, v) in row.iter_mut().enumerate() {
                    let p = off + i0 * nb0;
                    *v = f16::from_le_bytes([bytes[p], bytes[p + 1]]).to_f32();
                }
            }
            DType::I32 => {
                for (i0, v) in row.iter_mut().enumerate() {
                    let p = off + i0 * nb0;
                    *v = i32::from_le_bytes([bytes[p], bytes[p + 1], bytes[p + 2], bytes[p + 3]])
                        as f32;
                }
            }
            dtype => {
                let len = dtype.row_size(ne0 as i64);
                quants::dequantize_row(dtype, &bytes[off..off + len], row)?;
            }
        }
    }
    Ok(out)
}

/// Encode dense logical values into a tensor's (possibly strided) storage.
pub fn write_f32(meta: &TensorMeta, values: &[f32], bytes: &mut [u8]) -> Result<()> {
    if values.len() != meta.numel() {
        return Err(BopsError::InvalidArgument(format!(
            "{} values cannot fill a tensor of shape {}",
            values.len(),
            meta.shape
        )));
    }
    check_span(meta, bytes.len())?;
    check_block_layout(meta)?;
    let ne0 = meta.shape.0[0] as usize;
    let nb0 = meta.nb[0];
    for (row, off) in values.chunks_exact(ne0.max(1)).zip(row_offsets(meta)) {
        match meta.dtype {
            DType::F32 => {
                for (i0, v) in row.iter().enumerate() {
                    let p = off + i0 * nb0;
                    bytes[p..p + 4].copy_from_slice(&v.to_le_bytes());
                }
            }
            DType::F16 => {
                for (i0, &v) in row.iter().enumerate() {
                    let p = off + i0 * nb0;
                    bytes[p..p + 2].copy_from_slice(&f16::from_f32(v).to_le_bytes());
                }
            }
            DType::I32 => {
                for (i0, &v) in row.iter().enumerate() {
                    let p = off + i0 * nb0;
                    bytes[p..p + 4].copy_from_slice(&(v as i32).to_le_bytes());
                }
            }
            dtype => {
                let encoded = quants::quantize_chunk(dtype, row)?;
                bytes[off..off + encoded.len()].copy_from_slice(&encoded);
            }
        }
    }
    Ok(())
}
