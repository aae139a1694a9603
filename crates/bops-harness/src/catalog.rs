//! The full list of cases run against every backend.

use bops_core::{DType, SortOrder, UnaryOp};

use crate::case::{BinaryOp, TestCase};

/// Weight types exercised by the matrix multiply families.
pub const MUL_MAT_TYPES: [DType; 9] = [
    DType::F32,
    DType::F16,
    DType::Q4_0,
    DType::Q4_1,
    DType::Q5_0,
    DType::Q5_1,
    DType::Q8_0,
    DType::Q4_K,
    DType::Q6_K,
];

/// `(ne, nr)` pairs for broadcasting binary ops.
const BIN_BCAST: [([i64; 4], [i64; 4]); 10] = [
    ([16, 10, 1, 1], [1, 1, 1, 1]),
    ([16, 10, 10, 1], [1, 1, 1, 1]),
    ([16, 10, 10, 10], [1, 1, 1, 1]),
    ([16, 10, 10, 10], [2, 1, 1, 1]),
    ([16, 10, 10, 10], [1, 2, 1, 1]),
    ([16, 10, 10, 10], [1, 1, 2, 1]),
    ([16, 10, 10, 10], [1, 1, 1, 2]),
    ([16, 10, 10, 10], [1, 1, 2, 2]),
    ([16, 10, 10, 10], [1, 2, 2, 2]),
    ([16, 10, 10, 10], [2, 2, 2, 2]),
];

/// `(bs, nr)` batch layouts for `MUL_MAT`.
const MUL_MAT_BATCHES: [([i64; 2], [i64; 2]); 7] = [
    ([1, 1], [1, 1]),
    ([10, 1], [1, 1]),
    ([10, 1], [2, 1]),
    ([10, 10], [1, 1]),
    ([10, 10], [2, 1]),
    ([10, 10], [1, 2]),
    ([10, 10], [2, 2]),
];

/// `(ne, n_dims, mode)` for rotary embeddings: llama layouts, then neox.
const ROPE: [([i64; 4], usize, u32); 8] = [
    ([128, 32, 10, 1], 128, 0),
    ([128, 40, 10, 1], 128, 0),
    ([128, 52, 10, 1], 128, 0),
    ([128, 64, 10, 1], 128, 0),
    ([64, 1, 10, 1], 64, 2),
    ([64, 71, 10, 1], 64, 2),
    ([64, 8, 10, 1], 64, 2),
    ([64, 128, 10, 1], 64, 2),
];

const F32: DType = DType::F32;

/// Every case, grouped by family.
pub fn catalog() -> Vec<TestCase> {
    let mut cases = Vec::new();

    for op in UnaryOp::ALL {
        cases.push(TestCase::Unary {
            op,
            dtype: F32,
            ne: [128, 10, 10, 10],
        });
    }

    for dtype in [DType::F32, DType::F16] {
        for n in [10, 16] {
            cases.push(TestCase::GetRows { dtype, n, m: 5, r: 3 });
        }
    }
    for dtype in [DType::Q4_0, DType::Q8_0] {
        cases.push(TestCase::GetRows {
            dtype,
            n: 32,
            m: 5,
            r: 3,
        });
    }
    cases.push(TestCase::GetRows {
        dtype: DType::Q4_K,
        n: 256,
        m: 5,
        r: 3,
    });

    cases.push(TestCase::Repeat {
        dtype: F32,
        ne: [10, 10, 10, 10],
        nr: [2, 2, 2, 2],
    });
    cases.push(TestCase::Dup {
        dtype: F32,
        ne: [10, 10, 10, 1],
    });
    for (src, dst) in [(F32, F32), (F32, DType::F16), (DType::F16, F32)] {
        cases.push(TestCase::Cpy {
            src,
            dst,
            ne: [10, 10, 10, 1],
        });
    }
    cases.push(TestCase::Cont {
        dtype: F32,
        ne: [10, 10, 10, 1],
    });

    for (ne, nr) in BIN_BCAST {
        for op in BinaryOp::ALL {
            cases.push(TestCase::BinBcast {
                op,
                dtype: F32,
                ne,
                nr,
            });
        }
    }

    cases.push(TestCase::Scale {
        dtype: F32,
        ne: [10, 10, 10, 10],
    });

    for eps in [1e-6f32, 1e-5, 1e-3, 1e-1] {
        let ne = [64, 10, 10, 10];
        cases.push(TestCase::Norm { dtype: F32, ne, eps });
        cases.push(TestCase::RmsNorm { dtype: F32, ne, eps });
    }

    for type_a in MUL_MAT_TYPES {
        for n in [1, 16] {
            for (bs, nr) in MUL_MAT_BATCHES {
                cases.push(TestCase::MulMat {
                    type_a,
                    type_b: F32,
                    m: 16,
                    n,
                    k: 256,
                    bs,
                    nr,
                });
            }
        }
    }

    cases.push(TestCase::Sqr {
        dtype: F32,
        ne: [10, 10, 10, 10],
    });
    cases.push(TestCase::Clamp {
        dtype: F32,
        ne: [10, 10, 10, 10],
        min: -0.5,
        max: 0.5,
    });

    for ne in [[10, 10, 1, 1], [10, 10, 10, 1], [10, 10, 10, 10]] {
        cases.push(TestCase::DiagMaskInf {
            dtype: F32,
            ne,
            n_past: 5,
        });
    }

    cases.push(TestCase::SoftMax {
        dtype: F32,
        ne: [10, 10, 10, 10],
    });

    for dtype in [DType::F32, DType::F16] {
        for (ne, n_dims, mode) in ROPE {
            cases.push(TestCase::Rope {
                dtype,
                ne,
                n_dims,
                mode,
                n_ctx: 512,
            });
        }
    }

    cases.push(TestCase::Alibi {
        dtype: F32,
        ne: [10, 10, 10, 10],
        n_past: 512,
        n_head: 10,
        bias_max: 0.5,
    });

    cases.push(TestCase::Im2Col {
        type_input: F32,
        type_kernel: DType::F16,
        ne_input: [10, 10, 3, 1],
        ne_kernel: [3, 3, 3, 1],
        s0: 1,
        s1: 1,
        p0: 1,
        p1: 1,
        d0: 1,
        d1: 1,
        is_2d: true,
    });
    cases.push(TestCase::Im2Col {
        type_input: F32,
        type_kernel: DType::F16,
        ne_input: [10, 3, 1, 1],
        ne_kernel: [3, 3, 1, 1],
        s0: 1,
        s1: 0,
        p0: 1,
        p1: 0,
        d0: 1,
        d1: 0,
        is_2d: false,
    });

    cases.push(TestCase::Concat {
        dtype: F32,
        ne: [10, 10, 10, 10],
        b_ne2: 10,
    });

    for order in [SortOrder::Asc, SortOrder::Desc] {
        cases.push(TestCase::ArgSort {
            dtype: F32,
            ne: [16, 10, 10, 10],
            order,
        });
    }

    for type_a in MUL_MAT_TYPES {
        for n_mats in [1, 2, 4] {
            for id in 0..n_mats {
                cases.push(TestCase::MulMatId {
                    type_a,
                    type_b: F32,
                    n_mats,
                    id,
                    m: 16,
                    n: 16,
                    k: 256,
                    bs: [1, 1],
                    nr: [1, 1],
                });
            }
        }
    }

    cases.push(TestCase::SumRows {
        dtype: F32,
        ne: [10, 10, 10, 10],
    });

    cases
}
