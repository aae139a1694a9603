//! Core type definitions: DType, Shape.

use serde::{Deserialize, Serialize};

/// Number of logical dimensions every tensor carries (`ne[0..3]`).
pub const MAX_DIMS: usize = 4;

/// Supported storage types for tensor elements.
///
/// Quantized kinds pack elements into fixed-size blocks: 32 per block for the
/// legacy formats, 256 per super-block for the K formats. A block is the
/// smallest unit that can be encoded or decoded.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    F32,
    F16,
    I32,
    Q4_0,
    Q4_1,
    Q5_0,
    Q5_1,
    Q8_0,
    Q4_K,
    Q6_K,
}

impl DType {
    /// Every quantized kind, in the order the catalog enumerates them.
    pub const QUANTIZED: [DType; 7] = [
        DType::Q4_0,
        DType::Q4_1,
        DType::Q5_0,
        DType::Q5_1,
        DType::Q8_0,
        DType::Q4_K,
        DType::Q6_K,
    ];

    /// Elements per block.
    pub fn block_size(self) -> usize {
        match self {
            DType::F32 | DType::F16 | DType::I32 => 1,
            DType::Q4_0 | DType::Q4_1 | DType::Q5_0 | DType::Q5_1 | DType::Q8_0 => 32,
            DType::Q4_K | DType::Q6_K => 256,
        }
    }

    /// Size in bytes of a single block.
    pub fn type_size(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 => 2,
            DType::Q4_0 => 18,
            DType::Q4_1 => 20,
            DType::Q5_0 => 22,
            DType::Q5_1 => 24,
            DType::Q8_0 => 34,
            DType::Q4_K => 144,
            DType::Q6_K => 210,
        }
    }

    pub fn is_quantized(self) -> bool {
        self.block_size() > 1
    }

    /// Bytes needed for a contiguous row of `ne0` elements.
    pub fn row_size(self, ne0: i64) -> usize {
        self.type_size() * ne0 as usize / self.block_size()
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::I32 => "i32",
            DType::Q4_0 => "q4_0",
            DType::Q4_1 => "q4_1",
            DType::Q5_0 => "q5_0",
            DType::Q5_1 => "q5_1",
            DType::Q8_0 => "q8_0",
            DType::Q4_K => "q4_k",
            DType::Q6_K => "q6_k",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Tensor shape: `ne[0]` is the innermost (fastest varying) dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(pub [i64; MAX_DIMS]);

impl Shape {
    pub fn new(ne: [i64; MAX_DIMS]) -> Self {
        Self(ne)
    }

    /// Build a shape from up to four dims, padding the rest with 1.
    pub fn from_dims(dims: &[i64]) -> Self {
        debug_assert!(dims.len() <= MAX_DIMS);
        let mut ne = [1; MAX_DIMS];
        ne[..dims.len()].copy_from_slice(dims);
        Self(ne)
    }

    /// Total number of elements.
    pub fn numel(&self) -> i64 {
        self.0.iter().product()
    }

    /// Number of rows, i.e. elements divided by `ne[0]`.
    pub fn nrows(&self) -> i64 {
        self.0[1] * self.0[2] * self.0[3]
    }

    pub fn dim(&self, axis: usize) -> i64 {
        self.0[axis]
    }

    /// Whether `self` tiles `target` exactly along every dimension.
    pub fn can_repeat_into(&self, target: &Shape) -> bool {
        self.0
            .iter()
            .zip(target.0.iter())
            .all(|(&s, &t)| s > 0 && t % s == 0)
    }

    /// Byte strides of a densely packed tensor of this shape.
    pub fn contiguous_strides(&self, dtype: DType) -> [usize; MAX_DIMS] {
        let mut nb = [0usize; MAX_DIMS];
        nb[0] = dtype.type_size();
        nb[1] = dtype.row_size(self.0[0]);
        for i in 2..MAX_DIMS {
            nb[i] = nb[i - 1] * self.0[i - 1] as usize;
        }
        nb
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_numel() {
        assert_eq!(Shape::new([2, 3, 4, 1]).numel(), 24);
        assert_eq!(Shape::from_dims(&[]).numel(), 1);
        assert_eq!(Shape::new([0, 5, 1, 1]).numel(), 0);
    }

    #[test]
    fn test_shape_from_dims_pads() {
        assert_eq!(Shape::from_dims(&[10, 5]), Shape::new([10, 5, 1, 1]));
        assert_eq!(Shape::from_dims(&[10, 5]).nrows(), 5);
    }

    #[test]
    fn test_can_repeat() {
        let src = Shape::new([10, 10, 1, 1]);
        assert!(src.can_repeat_into(&Shape::new([20, 10, 3, 1])));
        assert!(!src.can_repeat_into(&Shape::new([15, 10, 1, 1])));
    }

    #[test]
    fn test_contiguous_strides() {
        let s = Shape::new([64, 3, 2, 1]);
        assert_eq!(s.contiguous_strides(DType::F32), [4, 256, 768, 1536]);
        // 64 q4_0 elements = 2 blocks of 18 bytes per row.
        assert_eq!(s.contiguous_strides(DType::Q4_0), [18, 36, 108, 216]);
    }

    #[test]
    fn test_dtype_size() {
        assert_eq!(DType::F32.type_size(), 4);
        assert_eq!(DType::F16.type_size(), 2);
        assert_eq!(DType::Q8_0.type_size(), 34);
        assert_eq!(DType::Q5_1.block_size(), 32);
        assert!(DType::Q4_1.is_quantized());
        assert!(!DType::I32.is_quantized());
    }

    #[test]
    fn test_k_quant_super_blocks() {
        assert_eq!(DType::Q4_K.block_size(), 256);
        assert_eq!(DType::Q6_K.block_size(), 256);
        assert_eq!(DType::Q4_K.row_size(512), 288);
        assert_eq!(DType::Q6_K.row_size(256), 210);
        assert_eq!(DType::Q6_K.to_string(), "q6_k");
    }

    #[test]
    fn test_shape_display() {
        assert_eq!(Shape::new([128, 10, 10, 10]).to_string(), "[128,10,10,10]");
    }
}
