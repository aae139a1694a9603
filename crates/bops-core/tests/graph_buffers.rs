//! Execution through views and in-place nodes.

use bops_core::backend::{Backend, GraphBuffer, compute_graph};
use bops_core::cpu_kernels::CpuRefBackend;
use bops_core::graph::{Graph, OpKind, TensorMeta};
use bops_core::tensor::{read_f32, write_f32};
use bops_core::{DType, Shape};
use smallvec::SmallVec;

fn fill(g: &Graph, buf: &mut GraphBuffer, id: bops_core::NodeId, values: &[f32]) {
    let meta = g.meta(id).unwrap().clone();
    write_f32(&meta, values, buf.tensor_mut(id).unwrap()).unwrap();
}

fn read(g: &Graph, buf: &GraphBuffer, id: bops_core::NodeId) -> Vec<f32> {
    read_f32(g.meta(id).unwrap(), buf.get_tensor(id).unwrap()).unwrap()
}

#[test]
fn cont_of_transposed_view_materializes_transpose() {
    let mut g = Graph::new();
    let a = g.new_tensor(DType::F32, Shape::new([3, 2, 1, 1]));
    let packed = g.meta(a).unwrap().clone();
    let t_meta = TensorMeta {
        dtype: DType::F32,
        shape: Shape::new([2, 3, 1, 1]),
        nb: [packed.nb[1], packed.nb[0], packed.nb[2], packed.nb[3]],
    };
    let t = g.add_view(OpKind::Transpose, a, t_meta, 0).unwrap();
    let out = g.add_node(
        OpKind::Cont,
        SmallVec::from_slice(&[t]),
        TensorMeta::contiguous(DType::F32, Shape::new([2, 3, 1, 1])),
    );

    let mut buf = CpuRefBackend.alloc_graph(&g).unwrap();
    fill(&g, &mut buf, a, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    compute_graph(&CpuRefBackend, &g, out, &mut buf).unwrap();

    assert_eq!(read(&g, &buf, out), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
    // The view shares storage with its source.
    assert_eq!(buf.get_tensor(t).unwrap(), buf.get_tensor(a).unwrap());
}

#[test]
fn cpy_writes_into_destination_storage() {
    let mut g = Graph::new();
    let shape = Shape::new([4, 1, 1, 1]);
    let src = g.new_tensor(DType::F32, shape);
    let dst = g.new_tensor(DType::F16, shape);
    let out = g
        .add_inplace(
            OpKind::Cpy,
            SmallVec::from_slice(&[src, dst]),
            TensorMeta::contiguous(DType::F16, shape),
            dst,
        )
        .unwrap();

    let mut buf = CpuRefBackend.alloc_graph(&g).unwrap();
    fill(&g, &mut buf, src, &[0.5, -1.0, 2.0, 0.25]);
    compute_graph(&CpuRefBackend, &g, out, &mut buf).unwrap();

    assert_eq!(read(&g, &buf, dst), vec![0.5, -1.0, 2.0, 0.25]);
    assert_eq!(buf.get_tensor(out).unwrap().len(), 8);
}

#[test]
fn quantized_inputs_are_decoded_before_eval() {
    let mut g = Graph::new();
    let a = g.new_tensor(DType::Q8_0, Shape::new([32, 2, 1, 1]));
    let b = g.new_tensor(DType::F32, Shape::new([32, 1, 1, 1]));
    let out = g.add_node(
        OpKind::MulMat,
        SmallVec::from_slice(&[a, b]),
        TensorMeta::contiguous(DType::F32, Shape::new([2, 1, 1, 1])),
    );

    let mut buf = CpuRefBackend.alloc_graph(&g).unwrap();
    let mut a_vals = vec![0.0f32; 64];
    a_vals[0] = 1.0;
    a_vals[32] = -1.0;
    fill(&g, &mut buf, a, &a_vals);
    fill(&g, &mut buf, b, &[2.0; 32]);
    compute_graph(&CpuRefBackend, &g, out, &mut buf).unwrap();

    let got = read(&g, &buf, out);
    assert!((got[0] - 2.0).abs() < 1e-2);
    assert!((got[1] + 2.0).abs() < 1e-2);
}

#[test]
fn reset_graph_reuses_arena_between_builds() {
    let mut g = Graph::new();
    for round in 0..3 {
        g.reset();
        let a = g.new_tensor(DType::F32, Shape::new([2, 1, 1, 1]));
        let out = g.add_node(
            OpKind::Sqr,
            SmallVec::from_slice(&[a]),
            TensorMeta::contiguous(DType::F32, Shape::new([2, 1, 1, 1])),
        );
        assert_eq!(a.index(), 0, "round {round}");
        let mut buf = CpuRefBackend.alloc_graph(&g).unwrap();
        fill(&g, &mut buf, a, &[round as f32, 3.0]);
        compute_graph(&CpuRefBackend, &g, out, &mut buf).unwrap();
        assert_eq!(read(&g, &buf, out), vec![(round * round) as f32, 9.0]);
    }
}
