//! Test cases: one variant per operation family.
//!
//! A case knows how to declare its graph, how to fill its leaves and how much
//! disagreement it tolerates. Cases are plain data and serialize with serde,
//! so a catalog can be listed or stored for regression tracking.

use std::fmt::Display;

use bops_core::{DType, Graph, GraphBuffer, NodeId, SortOrder, UnaryOp};
use bops_ops::{ShapeError, builder, repeated};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::value::{init_tensor_uniform, set_i32, set_row_f32};
use crate::{HarnessError, Result};

/// Tolerance for most ops.
pub const DEFAULT_MAX_NMSE: f64 = 1e-6;
/// Tolerance for matrix multiplies, whose accumulation order varies by backend.
pub const MUL_MAT_MAX_NMSE: f64 = 5e-4;

/// Broadcasting binary arithmetic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Mul,
    Div,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 3] = [BinaryOp::Add, BinaryOp::Mul, BinaryOp::Div];

    pub fn desc(self) -> &'static str {
        match self {
            BinaryOp::Add => "ADD",
            BinaryOp::Mul => "MUL",
            BinaryOp::Div => "DIV",
        }
    }
}

/// One parameterized operation instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum TestCase {
    Unary {
        op: UnaryOp,
        dtype: DType,
        ne: [i64; 4],
    },
    /// Gather `r` of the `m` rows of an `n`-column matrix.
    GetRows {
        dtype: DType,
        n: i64,
        m: i64,
        r: i64,
    },
    Repeat {
        dtype: DType,
        ne: [i64; 4],
        nr: [i64; 4],
    },
    Dup {
        dtype: DType,
        ne: [i64; 4],
    },
    Cpy {
        src: DType,
        dst: DType,
        ne: [i64; 4],
    },
    /// Packs a transposed view.
    Cont {
        dtype: DType,
        ne: [i64; 4],
    },
    /// The lhs is `ne` tiled `nr` times; the rhs is `ne`.
    BinBcast {
        op: BinaryOp,
        dtype: DType,
        ne: [i64; 4],
        nr: [i64; 4],
    },
    Scale {
        dtype: DType,
        ne: [i64; 4],
    },
    Norm {
        dtype: DType,
        ne: [i64; 4],
        eps: f32,
    },
    RmsNorm {
        dtype: DType,
        ne: [i64; 4],
        eps: f32,
    },
    /// `a` is `[k, m, bs0, bs1]`, `b` is `[k, n, bs0 * nr0, bs1 * nr1]`.
    MulMat {
        type_a: DType,
        type_b: DType,
        m: i64,
        n: i64,
        k: i64,
        bs: [i64; 2],
        nr: [i64; 2],
    },
    /// Every candidate and `b` are `[k, m|n, bs0 * nr0, bs1 * nr1]`.
    MulMatId {
        type_a: DType,
        type_b: DType,
        n_mats: usize,
        id: usize,
        m: i64,
        n: i64,
        k: i64,
        bs: [i64; 2],
        nr: [i64; 2],
    },
    Sqr {
        dtype: DType,
        ne: [i64; 4],
    },
    Clamp {
        dtype: DType,
        ne: [i64; 4],
        min: f32,
        max: f32,
    },
    DiagMaskInf {
        dtype: DType,
        ne: [i64; 4],
        n_past: usize,
    },
    SoftMax {
        dtype: DType,
        ne: [i64; 4],
    },
    Rope {
        dtype: DType,
        ne: [i64; 4],
        n_dims: usize,
        mode: u32,
        n_ctx: usize,
    },
    Alibi {
        dtype: DType,
        ne: [i64; 4],
        n_past: usize,
        n_head: usize,
        bias_max: f32,
    },
    Im2Col {
        type_input: DType,
        type_kernel: DType,
        ne_input: [i64; 4],
        ne_kernel: [i64; 4],
        s0: usize,
        s1: usize,
        p0: usize,
        p1: usize,
        d0: usize,
        d1: usize,
        is_2d: bool,
    },
    /// Concatenates `[ne0, ne1, b_ne2, ne3]` onto `ne` along dim 2.
    Concat {
        dtype: DType,
        ne: [i64; 4],
        b_ne2: i64,
    },
    ArgSort {
        dtype: DType,
        ne: [i64; 4],
        order: SortOrder,
    },
    SumRows {
        dtype: DType,
        ne: [i64; 4],
    },
}

/// Ordered `name=value` pairs.
#[derive(Default)]
struct Vars(Vec<String>);

impl Vars {
    fn put(mut self, name: &str, value: impl Display) -> Self {
        self.0.push(format!("{name}={value}"));
        self
    }

    fn float(self, name: &str, value: f32) -> Self {
        self.put(name, format!("{value:.6}"))
    }

    fn dims(self, name: &str, dims: &[i64]) -> Self {
        let inner: Vec<String> = dims.iter().map(i64::to_string).collect();
        self.put(name, format!("[{}]", inner.join(",")))
    }

    fn finish(self) -> String {
        self.0.join(",")
    }
}

impl TestCase {
    /// Name of the op under test, as reported and matched by the op filter.
    pub fn op_desc(&self) -> &'static str {
        match self {
            TestCase::Unary { op, .. } => op.desc(),
            TestCase::GetRows { .. } => "GET_ROWS",
            TestCase::Repeat { .. } => "REPEAT",
            TestCase::Dup { .. } => "DUP",
            TestCase::Cpy { .. } => "CPY",
            TestCase::Cont { .. } => "CONT",
            TestCase::BinBcast { op, .. } => op.desc(),
            TestCase::Scale { .. } => "SCALE",
            TestCase::Norm { .. } => "NORM",
            TestCase::RmsNorm { .. } => "RMS_NORM",
            TestCase::MulMat { .. } => "MUL_MAT",
            TestCase::MulMatId { .. } => "MUL_MAT_ID",
            TestCase::Sqr { .. } => "SQR",
            TestCase::Clamp { .. } => "CLAMP",
            TestCase::DiagMaskInf { .. } => "DIAG_MASK_INF",
            TestCase::SoftMax { .. } => "SOFT_MAX",
            TestCase::Rope { .. } => "ROPE",
            TestCase::Alibi { .. } => "ALIBI",
            TestCase::Im2Col { .. } => "IM2COL",
            TestCase::Concat { .. } => "CONCAT",
            TestCase::ArgSort { .. } => "ARGSORT",
            TestCase::SumRows { .. } => "SUM_ROWS",
        }
    }

    /// Parameter key distinguishing this instance within its family.
    pub fn vars(&self) -> String {
        let v = Vars::default();
        let v = match self {
            TestCase::Unary { dtype, ne, .. }
            | TestCase::Dup { dtype, ne }
            | TestCase::Cont { dtype, ne }
            | TestCase::Scale { dtype, ne }
            | TestCase::Sqr { dtype, ne }
            | TestCase::SoftMax { dtype, ne }
            | TestCase::SumRows { dtype, ne } => v.put("type", dtype).dims("ne", ne),
            TestCase::GetRows { dtype, n, m, r } => {
                v.put("type", dtype).put("n", n).put("m", m).put("r", r)
            }
            TestCase::Repeat { dtype, ne, nr } | TestCase::BinBcast { dtype, ne, nr, .. } => {
                v.put("type", dtype).dims("ne", ne).dims("nr", nr)
            }
            TestCase::Cpy { src, dst, ne } => {
                v.put("type_src", src).put("type_dst", dst).dims("ne", ne)
            }
            TestCase::Norm { dtype, ne, eps } | TestCase::RmsNorm { dtype, ne, eps } => {
                v.put("type", dtype).dims("ne", ne).float("eps", *eps)
            }
            TestCase::MulMat {
                type_a,
                type_b,
                m,
                n,
                k,
                bs,
                nr,
            } => v
                .put("type_a", type_a)
                .put("type_b", type_b)
                .put("m", m)
                .put("n", n)
                .put("k", k)
                .dims("bs", bs)
                .dims("nr", nr),
            TestCase::MulMatId {
                type_a,
                type_b,
                n_mats,
                id,
                m,
                n,
                k,
                bs,
                nr,
            } => v
                .put("type_a", type_a)
                .put("type_b", type_b)
                .put("n_mats", n_mats)
                .put("id", id)
                .put("m", m)
                .put("n", n)
                .put("k", k)
                .dims("bs", bs)
                .dims("nr", nr),
            TestCase::Clamp { dtype, ne, min, max } => v
                .put("type", dtype)
                .dims("ne", ne)
                .float("min", *min)
                .float("max", *max),
            TestCase::DiagMaskInf { dtype, ne, n_past } => {
                v.put("type", dtype).dims("ne", ne).put("n_past", n_past)
            }
            TestCase::Rope {
                dtype,
                ne,
                n_dims,
                mode,
                n_ctx,
            } => v
                .put("type", dtype)
                .dims("ne", ne)
                .put("n_dims", n_dims)
                .put("mode", mode)
                .put("n_ctx", n_ctx),
            TestCase::Alibi {
                dtype,
                ne,
                n_past,
                n_head,
                bias_max,
            } => v
                .put("type", dtype)
                .dims("ne", ne)
                .put("n_past", n_past)
                .put("n_head", n_head)
                .float("bias_max", *bias_max),
            TestCase::Im2Col {
                type_input,
                type_kernel,
                ne_input,
                ne_kernel,
                s0,
                s1,
                p0,
                p1,
                d0,
                d1,
                is_2d,
            } => v
                .put("type_input", type_input)
                .put("type_kernel", type_kernel)
                .dims("ne_input", ne_input)
                .dims("ne_kernel", ne_kernel)
                .put("s0", s0)
                .put("s1", s1)
                .put("p0", p0)
                .put("p1", p1)
                .put("d0", d0)
                .put("d1", d1)
                .put("is_2D", u8::from(*is_2d)),
            TestCase::Concat { dtype, ne, b_ne2 } => {
                v.put("type", dtype).dims("ne", ne).put("b_ne2", b_ne2)
            }
            TestCase::ArgSort { dtype, ne, order } => {
                let order = match order {
                    SortOrder::Asc => 0,
                    SortOrder::Desc => 1,
                };
                v.put("type", dtype).dims("ne", ne).put("order", order)
            }
        };
        v.finish()
    }

    pub fn max_nmse_err(&self) -> f64 {
        match self {
            TestCase::MulMat { .. } | TestCase::MulMatId { .. } => MUL_MAT_MAX_NMSE,
            _ => DEFAULT_MAX_NMSE,
        }
    }

    /// Declare the leaves and the op under test; returns the output node.
    pub fn build_graph(&self, g: &mut Graph) -> std::result::Result<NodeId, ShapeError> {
        use builder::new_tensor;
        match self {
            TestCase::Unary { op, dtype, ne } => {
                let a = new_tensor(g, *dtype, *ne)?;
                builder::unary(g, *op, a)
            }
            TestCase::GetRows { dtype, n, m, r } => {
                let a = new_tensor(g, *dtype, [*n, *m, 1, 1])?;
                let rows = new_tensor(g, DType::I32, [*r, 1, 1, 1])?;
                builder::get_rows(g, a, rows)
            }
            TestCase::Repeat { dtype, ne, nr } => {
                let target = new_tensor(g, *dtype, repeated(*ne, *nr).0)?;
                let src = new_tensor(g, *dtype, *ne)?;
                builder::repeat(g, src, target)
            }
            TestCase::Dup { dtype, ne } => {
                let a = new_tensor(g, *dtype, *ne)?;
                builder::dup(g, a)
            }
            TestCase::Cpy { src, dst, ne } => {
                let a = new_tensor(g, *src, *ne)?;
                let b = new_tensor(g, *dst, *ne)?;
                builder::cpy(g, a, b)
            }
            TestCase::Cont { dtype, ne } => {
                let a = new_tensor(g, *dtype, *ne)?;
                let t = builder::transpose(g, a)?;
                builder::cont(g, t)
            }
            TestCase::BinBcast { op, dtype, ne, nr } => {
                let a = new_tensor(g, *dtype, repeated(*ne, *nr).0)?;
                let b = new_tensor(g, *dtype, *ne)?;
                match op {
                    BinaryOp::Add => builder::add(g, a, b),
                    BinaryOp::Mul => builder::mul(g, a, b),
                    BinaryOp::Div => builder::div(g, a, b),
                }
            }
            TestCase::Scale { dtype, ne } => {
                let a = new_tensor(g, *dtype, *ne)?;
                let s = new_tensor(g, *dtype, [1, 1, 1, 1])?;
                builder::scale(g, a, s)
            }
            TestCase::Norm { dtype, ne, eps } => {
                let a = new_tensor(g, *dtype, *ne)?;
                builder::norm(g, a, *eps)
            }
            TestCase::RmsNorm { dtype, ne, eps } => {
                let a = new_tensor(g, *dtype, *ne)?;
                builder::rms_norm(g, a, *eps)
            }
            TestCase::MulMat {
                type_a,
                type_b,
                m,
                n,
                k,
                bs,
                nr,
            } => {
                let a = new_tensor(g, *type_a, [*k, *m, bs[0], bs[1]])?;
                let b = new_tensor(g, *type_b, [*k, *n, bs[0] * nr[0], bs[1] * nr[1]])?;
                builder::mul_mat(g, a, b)
            }
            TestCase::MulMatId {
                type_a,
                type_b,
                n_mats,
                id,
                m,
                n,
                k,
                bs,
                nr,
            } => {
                let (ne2, ne3) = (bs[0] * nr[0], bs[1] * nr[1]);
                let mats = (0..*n_mats)
                    .map(|_| new_tensor(g, *type_a, [*k, *m, ne2, ne3]))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let ids = new_tensor(g, DType::I32, [*n_mats as i64, 1, 1, 1])?;
                let b = new_tensor(g, *type_b, [*k, *n, ne2, ne3])?;
                builder::mul_mat_id(g, &mats, ids, *id, b)
            }
            TestCase::Sqr { dtype, ne } => {
                let a = new_tensor(g, *dtype, *ne)?;
                builder::sqr(g, a)
            }
            TestCase::Clamp { dtype, ne, min, max } => {
                let a = new_tensor(g, *dtype, *ne)?;
                builder::clamp(g, a, *min, *max)
            }
            TestCase::DiagMaskInf { dtype, ne, n_past } => {
                let a = new_tensor(g, *dtype, *ne)?;
                builder::diag_mask_inf(g, a, *n_past)
            }
            TestCase::SoftMax { dtype, ne } => {
                let a = new_tensor(g, *dtype, *ne)?;
                builder::soft_max(g, a)
            }
            TestCase::Rope {
                dtype,
                ne,
                n_dims,
                mode,
                n_ctx,
            } => {
                let a = new_tensor(g, *dtype, *ne)?;
                let pos = new_tensor(g, DType::I32, [ne[2], 1, 1, 1])?;
                builder::rope(g, a, pos, *n_dims, *mode, *n_ctx)
            }
            TestCase::Alibi {
                dtype,
                ne,
                n_past,
                n_head,
                bias_max,
            } => {
                let a = new_tensor(g, *dtype, *ne)?;
                builder::alibi(g, a, *n_past, *n_head, *bias_max)
            }
            TestCase::Im2Col {
                type_input,
                type_kernel,
                ne_input,
                ne_kernel,
                s0,
                s1,
                p0,
                p1,
                d0,
                d1,
                is_2d,
            } => {
                let input = new_tensor(g, *type_input, *ne_input)?;
                let kernel = new_tensor(g, *type_kernel, *ne_kernel)?;
                builder::im2col(g, kernel, input, *s0, *s1, *p0, *p1, *d0, *d1, *is_2d)
            }
            TestCase::Concat { dtype, ne, b_ne2 } => {
                let a = new_tensor(g, *dtype, *ne)?;
                let b = new_tensor(g, *dtype, [ne[0], ne[1], *b_ne2, ne[3]])?;
                builder::concat(g, a, b)
            }
            TestCase::ArgSort { dtype, ne, order } => {
                let a = new_tensor(g, *dtype, *ne)?;
                builder::argsort(g, a, *order)
            }
            TestCase::SumRows { dtype, ne } => {
                let a = new_tensor(g, *dtype, *ne)?;
                builder::sum_rows(g, a)
            }
        }
    }

    /// Fill every leaf of `graph`, honouring structural constraints on index
    /// and key inputs. Everything else is uniform in `[-1, 1]`.
    pub fn initialize_tensors<R: Rng>(
        &self,
        graph: &Graph,
        buffer: &mut GraphBuffer,
        rng: &mut R,
    ) -> Result<()> {
        for leaf in graph.leaves() {
            let id = leaf.id;
            let meta = &leaf.meta;
            match (self, meta.dtype) {
                (TestCase::GetRows { m, .. }, DType::I32) => {
                    let rows = positive(*m, "row count")?;
                    set_i32(graph, id, buffer, &row_indices(rng, meta.numel(), rows))?;
                }
                (TestCase::Rope { n_ctx, .. }, DType::I32) => {
                    let n_ctx = positive(*n_ctx as i64, "context length")?;
                    set_i32(graph, id, buffer, &row_indices(rng, meta.numel(), n_ctx))?;
                }
                (TestCase::MulMatId { .. }, DType::I32) => {
                    set_i32(graph, id, buffer, &routing_ids(rng, meta.numel()))?;
                }
                (TestCase::ArgSort { .. }, DType::F32) => {
                    let ne0 = meta.shape.0[0] as usize;
                    for row in 0..meta.shape.nrows() as usize {
                        set_row_f32(graph, id, buffer, row, &distinct_ranks(rng, ne0))?;
                    }
                }
                _ => init_tensor_uniform(graph, id, buffer, rng, -1.0, 1.0)?,
            }
        }
        Ok(())
    }
}

fn positive(n: i64, what: &str) -> Result<usize> {
    if n <= 0 {
        return Err(HarnessError::Malformed(format!("{what} {n} leaves no valid index")));
    }
    Ok(n as usize)
}

/// `count` indices drawn uniformly from `[0, limit)`.
pub fn row_indices<R: Rng>(rng: &mut R, count: usize, limit: usize) -> Vec<i32> {
    (0..count).map(|_| rng.random_range(0..limit) as i32).collect()
}

/// The ranks `0..n` as floats, shuffled. No two keys tie.
pub fn distinct_ranks<R: Rng>(rng: &mut R, n: usize) -> Vec<f32> {
    let mut keys: Vec<f32> = (0..n).map(|i| i as f32).collect();
    keys.shuffle(rng);
    keys
}

/// A shuffled permutation of `0..n`, so every route is taken exactly once.
pub fn routing_ids<R: Rng>(rng: &mut R, n: usize) -> Vec<i32> {
    let mut ids: Vec<i32> = (0..n as i32).collect();
    ids.shuffle(rng);
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use bops_core::Shape;
    use bops_core::tensor::read_f32;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn built(case: &TestCase) -> (Graph, NodeId, GraphBuffer) {
        let mut g = Graph::new();
        let out = case.build_graph(&mut g).unwrap();
        let buf = GraphBuffer::host(&g).unwrap();
        (g, out, buf)
    }

    #[test]
    fn test_vars_format() {
        let case = TestCase::Norm {
            dtype: DType::F32,
            ne: [64, 10, 10, 10],
            eps: 1e-6,
        };
        assert_eq!(case.vars(), "type=f32,ne=[64,10,10,10],eps=0.000001");

        let case = TestCase::MulMat {
            type_a: DType::Q4_1,
            type_b: DType::F32,
            m: 16,
            n: 1,
            k: 256,
            bs: [10, 1],
            nr: [2, 1],
        };
        assert_eq!(
            case.vars(),
            "type_a=q4_1,type_b=f32,m=16,n=1,k=256,bs=[10,1],nr=[2,1]"
        );
    }

    #[test]
    fn test_unary_vars_omit_op() {
        let case = TestCase::Unary {
            op: UnaryOp::GeluQuick,
            dtype: DType::F32,
            ne: [128, 10, 10, 10],
        };
        assert_eq!(case.op_desc(), "GELU_QUICK");
        assert_eq!(case.vars(), "type=f32,ne=[128,10,10,10]");
    }

    #[test]
    fn test_tolerances() {
        let mm = TestCase::MulMatId {
            type_a: DType::F16,
            type_b: DType::F32,
            n_mats: 2,
            id: 1,
            m: 16,
            n: 16,
            k: 256,
            bs: [1, 1],
            nr: [1, 1],
        };
        assert_eq!(mm.max_nmse_err(), 5e-4);
        let sq = TestCase::Sqr {
            dtype: DType::F32,
            ne: [10, 10, 10, 10],
        };
        assert_eq!(sq.max_nmse_err(), 1e-6);
    }

    #[test]
    fn test_get_rows_indices_in_range() {
        let case = TestCase::GetRows {
            dtype: DType::F32,
            n: 10,
            m: 5,
            r: 3,
        };
        let (g, out, mut buf) = built(&case);
        let mut rng = StdRng::seed_from_u64(4);
        case.initialize_tensors(&g, &mut buf, &mut rng).unwrap();
        let rows = g.node(out).unwrap().inputs[1];
        let idx = read_f32(g.meta(rows).unwrap(), buf.get_tensor(rows).unwrap()).unwrap();
        assert_eq!(idx.len(), 3);
        assert!(idx.iter().all(|&i| (0.0..5.0).contains(&i)));
    }

    #[test]
    fn test_argsort_rows_have_no_ties() {
        let case = TestCase::ArgSort {
            dtype: DType::F32,
            ne: [16, 3, 2, 1],
            order: SortOrder::Asc,
        };
        let (g, out, mut buf) = built(&case);
        let mut rng = StdRng::seed_from_u64(8);
        case.initialize_tensors(&g, &mut buf, &mut rng).unwrap();
        let keys = g.node(out).unwrap().inputs[0];
        let data = read_f32(g.meta(keys).unwrap(), buf.get_tensor(keys).unwrap()).unwrap();
        for row in data.chunks_exact(16) {
            let mut sorted = row.to_vec();
            sorted.sort_by(f32::total_cmp);
            assert_eq!(sorted, (0..16).map(|i| i as f32).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_routing_ids_are_a_permutation() {
        let case = TestCase::MulMatId {
            type_a: DType::F32,
            type_b: DType::F32,
            n_mats: 4,
            id: 2,
            m: 16,
            n: 16,
            k: 256,
            bs: [1, 1],
            nr: [1, 1],
        };
        let (g, out, mut buf) = built(&case);
        let mut rng = StdRng::seed_from_u64(2);
        case.initialize_tensors(&g, &mut buf, &mut rng).unwrap();
        let ids = g.node(out).unwrap().inputs[0];
        let mut data = read_f32(g.meta(ids).unwrap(), buf.get_tensor(ids).unwrap()).unwrap();
        data.sort_by(f32::total_cmp);
        assert_eq!(data, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_routed_mul_mat_batches() {
        let case = TestCase::MulMatId {
            type_a: DType::Q4_K,
            type_b: DType::F32,
            n_mats: 2,
            id: 0,
            m: 16,
            n: 4,
            k: 256,
            bs: [3, 2],
            nr: [2, 1],
        };
        assert_eq!(
            case.vars(),
            "type_a=q4_k,type_b=f32,n_mats=2,id=0,m=16,n=4,k=256,bs=[3,2],nr=[2,1]"
        );
        let (g, out, _) = built(&case);
        let node = g.node(out).unwrap();
        assert_eq!(node.meta.shape, Shape::new([16, 4, 6, 2]));
        for &input in &node.inputs[1..] {
            let ne = g.meta(input).unwrap().shape;
            assert_eq!((ne.dim(2), ne.dim(3)), (6, 2));
        }
    }

    #[test]
    fn test_rope_positions_within_context() {
        let case = TestCase::Rope {
            dtype: DType::F16,
            ne: [64, 8, 10, 1],
            n_dims: 64,
            mode: 2,
            n_ctx: 512,
        };
        let (g, out, mut buf) = built(&case);
        let mut rng = StdRng::seed_from_u64(6);
        case.initialize_tensors(&g, &mut buf, &mut rng).unwrap();
        let pos = g.node(out).unwrap().inputs[1];
        let data = read_f32(g.meta(pos).unwrap(), buf.get_tensor(pos).unwrap()).unwrap();
        assert_eq!(data.len(), 10);
        assert!(data.iter().all(|&p| (0.0..512.0).contains(&p)));
    }

    #[test]
    fn test_empty_index_range_is_malformed() {
        assert!(matches!(positive(0, "row count"), Err(HarnessError::Malformed(_))));
        assert_eq!(positive(5, "row count").unwrap(), 5);
    }

    #[test]
    fn test_serde_roundtrip_tagged() {
        let case = TestCase::BinBcast {
            op: BinaryOp::Div,
            dtype: DType::F32,
            ne: [16, 10, 10, 10],
            nr: [2, 1, 1, 1],
        };
        let json = serde_json::to_string(&case).unwrap();
        assert!(json.contains("\"family\":\"bin_bcast\""));
        assert!(json.contains("\"op\":\"div\""));
        let back: TestCase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, case);
    }
}
