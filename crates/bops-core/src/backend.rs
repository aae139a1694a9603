//! Backend trait, graph buffers and graph execution.
//!
//! A `Backend` knows how to execute a single graph node (op + inputs → output).
//! `GraphBuffer` holds the storage of every tensor in a graph; the free
//! functions here walk a graph in topological order, feeding each node's
//! decoded inputs to a backend and storing the result back.

use std::ops::ControlFlow;

use tracing::{debug, trace};

use crate::graph::{Graph, Node, NodeId, OpKind, TensorMeta};
use crate::tensor;
use crate::types::{DType, Shape};
use crate::{BopsError, Result};

/// Materialized input data passed to a backend for evaluation.
pub struct NodeInput<'a> {
    pub data: &'a [f32],
    pub shape: &'a Shape,
    pub dtype: DType,
}

/// Pluggable compute backend.
///
/// Backends evaluate individual graph nodes on dense `f32` data in logical
/// order. Scheduling, storage and dtype conversion are handled by
/// [`compute_graph`] and [`compare_graph_backend`].
pub trait Backend: Send + Sync {
    /// Name under which the backend reports results.
    fn name(&self) -> &str;

    /// Whether this backend can evaluate `node`.
    fn supports_op(&self, _graph: &Graph, _node: &Node) -> bool {
        true
    }

    /// Evaluate a single op node given its materialized inputs.
    fn eval_node(
        &self,
        op: &OpKind,
        inputs: &[NodeInput<'_>],
        output_meta: &TensorMeta,
    ) -> Result<Vec<f32>>;

    /// Allocate storage for every tensor in `graph`.
    fn alloc_graph(&self, graph: &Graph) -> Result<GraphBuffer> {
        GraphBuffer::host(graph)
    }
}

const TENSOR_ALIGN: usize = 32;

#[derive(Clone, Copy, Debug)]
struct Slot {
    offset: usize,
    len: usize,
}

/// Storage for all tensors of one graph.
///
/// Views and in-place nodes share their root node's bytes. The storage is
/// released when the buffer is dropped.
#[derive(Clone, Debug, Default)]
pub struct GraphBuffer {
    data: Vec<u8>,
    slots: Vec<Option<Slot>>,
}

impl GraphBuffer {
    /// Lay out every storage-owning node in one zeroed host allocation.
    pub fn host(graph: &Graph) -> Result<Self> {
        let mut slots: Vec<Option<Slot>> = vec![None; graph.len()];
        let mut cursor = 0usize;
        for node in graph.nodes() {
            let len = node.meta.nbytes();
            let offset = match node.view {
                Some(view) => {
                    let root = slots
                        .get(view.src.index())
                        .copied()
                        .flatten()
                        .ok_or_else(|| {
                            BopsError::InvalidArgument(format!(
                                "view {} declared before its source",
                                node.id.index()
                            ))
                        })?;
                    if view.offset + len > root.len {
                        return Err(BopsError::OutOfBounds {
                            offset: view.offset,
                            len,
                            size: root.len,
                        });
                    }
                    root.offset + view.offset
                }
                None => {
                    let offset = cursor.next_multiple_of(TENSOR_ALIGN);
                    cursor = offset + len;
                    offset
                }
            };
            slots[node.id.index()] = Some(Slot { offset, len });
        }
        trace!(bytes = cursor, tensors = graph.len(), "allocated graph buffer");
        Ok(Self {
            data: vec![0u8; cursor],
            slots,
        })
    }

    /// Total bytes held.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    fn slot(&self, id: NodeId) -> Result<Slot> {
        self.slots
            .get(id.index())
            .copied()
            .flatten()
            .ok_or_else(|| {
                BopsError::InvalidArgument(format!("tensor {} has no storage", id.index()))
            })
    }

    /// Raw bytes of a tensor.
    pub fn get_tensor(&self, id: NodeId) -> Result<&[u8]> {
        let slot = self.slot(id)?;
        Ok(&self.data[slot.offset..slot.offset + slot.len])
    }

    /// Mutable raw bytes of a tensor.
    pub fn tensor_mut(&mut self, id: NodeId) -> Result<&mut [u8]> {
        let slot = self.slot(id)?;
        Ok(&mut self.data[slot.offset..slot.offset + slot.len])
    }

    /// Copy `bytes` into a tensor's storage starting `offset` bytes in.
    pub fn set_tensor(&mut self, id: NodeId, offset: usize, bytes: &[u8]) -> Result<()> {
        let slot = self.slot(id)?;
        if offset + bytes.len() > slot.len {
            return Err(BopsError::OutOfBounds {
                offset,
                len: bytes.len(),
                size: slot.len,
            });
        }
        let start = slot.offset + offset;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// One executed node, with its storage as produced by both backends.
pub struct NodeVisit<'a> {
    pub node: &'a Node,
    pub candidate: &'a [u8],
    pub reference: &'a [u8],
}

fn eval_into(
    backend: &dyn Backend,
    graph: &Graph,
    node: &Node,
    buffer: &mut GraphBuffer,
) -> Result<()> {
    let mut decoded = Vec::with_capacity(node.inputs.len());
    for &id in &node.inputs {
        let meta = graph.meta(id)?;
        decoded.push(tensor::read_f32(meta, buffer.get_tensor(id)?)?);
    }
    let mut inputs = Vec::with_capacity(decoded.len());
    for (data, &id) in decoded.iter().zip(&node.inputs) {
        let meta = graph.meta(id)?;
        inputs.push(NodeInput {
            data: data.as_slice(),
            shape: &meta.shape,
            dtype: meta.dtype,
        });
    }

    let out = backend.eval_node(&node.op, &inputs, &node.meta)?;
    if out.len() != node.meta.numel() {
        return Err(BopsError::ShapeMismatch {
            expected: node.meta.shape.0.to_vec(),
            got: vec![out.len() as i64],
        });
    }
    tensor::write_f32(&node.meta, &out, buffer.tensor_mut(node.id)?)
}

/// Execute the subgraph producing `output` on a single backend.
pub fn compute_graph(
    backend: &dyn Backend,
    graph: &Graph,
    output: NodeId,
    buffer: &mut GraphBuffer,
) -> Result<()> {
    for id in graph.topo_sort(&[output]) {
        let node = graph.node(id)?;
        if !node.is_computed() {
            continue;
        }
        debug!(backend = backend.name(), op = node.op.desc(), node = id.index(), "eval");
        eval_into(backend, graph, node, buffer)?;
    }
    Ok(())
}

/// Execute the subgraph producing `output` on both backends, node by node.
///
/// `buffer` must already hold the initialized inputs; the reference runs on a
/// private copy of it. After each executed node `visit` sees both results and
/// may stop the walk early. Returns `true` if every node was visited.
pub fn compare_graph_backend<F>(
    candidate: &dyn Backend,
    reference: &dyn Backend,
    graph: &Graph,
    output: NodeId,
    buffer: &mut GraphBuffer,
    mut visit: F,
) -> Result<bool>
where
    F: FnMut(&NodeVisit<'_>) -> ControlFlow<()>,
{
    let mut ref_buffer = buffer.clone();
    for id in graph.topo_sort(&[output]) {
        let node = graph.node(id)?;
        if !node.is_computed() {
            continue;
        }
        eval_into(candidate, graph, node, buffer)?;
        eval_into(reference, graph, node, &mut ref_buffer)?;

        let step = NodeVisit {
            node,
            candidate: buffer.get_tensor(id)?,
            reference: ref_buffer.get_tensor(id)?,
        };
        if visit(&step).is_break() {
            debug!(op = node.op.desc(), "comparison stopped early");
            return Ok(false);
        }
    }
    Ok(true)
}

type InitFn = Box<dyn Fn() -> Result<Box<dyn Backend>> + Send + Sync>;

/// Named backend constructors, enumerated by index.
#[derive(Default)]
pub struct BackendRegistry {
    entries: Vec<(String, InitFn)>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, init: F)
    where
        F: Fn() -> Result<Box<dyn Backend>> + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Box::new(init)));
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|(name, _)| name.as_str())
    }

    pub fn init_backend(&self, index: usize) -> Result<Box<dyn Backend>> {
        let (_, init) = self.entries.get(index).ok_or_else(|| {
            BopsError::InvalidArgument(format!("no backend registered at index {index}"))
        })?;
        init()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_kernels::CpuRefBackend;
    use smallvec::SmallVec;

    fn f32_bytes(v: &[f32]) -> Vec<u8> {
        v.iter().flat_map(|x| x.to_le_bytes()).collect()
    }

    fn add_graph() -> (Graph, NodeId, NodeId, NodeId) {
        let mut g = Graph::new();
        let shape = Shape::new([2, 1, 1, 1]);
        let a = g.new_tensor(DType::F32, shape);
        let b = g.new_tensor(DType::F32, shape);
        let c = g.add_node(
            OpKind::Add,
            SmallVec::from_slice(&[a, b]),
            TensorMeta::contiguous(DType::F32, shape),
        );
        (g, a, b, c)
    }

    /// Doubles every result of the reference.
    struct Doubling;

    impl Backend for Doubling {
        fn name(&self) -> &str {
            "doubling"
        }

        fn eval_node(
            &self,
            op: &OpKind,
            inputs: &[NodeInput<'_>],
            output_meta: &TensorMeta,
        ) -> Result<Vec<f32>> {
            let out = CpuRefBackend.eval_node(op, inputs, output_meta)?;
            Ok(out.into_iter().map(|v| v * 2.0).collect())
        }
    }

    #[test]
    fn test_compute_graph_add() {
        let (g, a, b, c) = add_graph();
        let mut buf = CpuRefBackend.alloc_graph(&g).unwrap();
        buf.set_tensor(a, 0, &f32_bytes(&[1.0, 2.0])).unwrap();
        buf.set_tensor(b, 0, &f32_bytes(&[3.0, 4.0])).unwrap();
        compute_graph(&CpuRefBackend, &g, c, &mut buf).unwrap();
        assert_eq!(buf.get_tensor(c).unwrap(), f32_bytes(&[4.0, 6.0]).as_slice());
    }

    #[test]
    fn test_buffer_alignment_and_bounds() {
        let (g, a, _, c) = add_graph();
        let mut buf = GraphBuffer::host(&g).unwrap();
        assert_eq!(buf.get_tensor(a).unwrap().len(), 8);
        assert!(buf.size() >= 2 * TENSOR_ALIGN + 8);
        assert!(matches!(
            buf.set_tensor(c, 4, &[0u8; 8]),
            Err(BopsError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_compare_visits_both_results() {
        let (g, a, b, c) = add_graph();
        let mut buf = GraphBuffer::host(&g).unwrap();
        buf.set_tensor(a, 0, &f32_bytes(&[1.0, 2.0])).unwrap();
        buf.set_tensor(b, 0, &f32_bytes(&[3.0, 4.0])).unwrap();

        let mut seen = Vec::new();
        let done = compare_graph_backend(&Doubling, &CpuRefBackend, &g, c, &mut buf, |v| {
            seen.push((v.node.id, v.candidate.to_vec(), v.reference.to_vec()));
            ControlFlow::Continue(())
        })
        .unwrap();

        assert!(done);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, f32_bytes(&[8.0, 12.0]));
        assert_eq!(seen[0].2, f32_bytes(&[4.0, 6.0]));
    }

    #[test]
    fn test_compare_stops_on_break() {
        let mut g = Graph::new();
        let shape = Shape::new([4, 1, 1, 1]);
        let meta = TensorMeta::contiguous(DType::F32, shape);
        let a = g.new_tensor(DType::F32, shape);
        let s = g.add_node(OpKind::Sqr, SmallVec::from_slice(&[a]), meta.clone());
        let out = g.add_node(OpKind::Sqr, SmallVec::from_slice(&[s]), meta);
        let mut buf = GraphBuffer::host(&g).unwrap();

        let mut visits = 0;
        let done = compare_graph_backend(&CpuRefBackend, &CpuRefBackend, &g, out, &mut buf, |_| {
            visits += 1;
            ControlFlow::Break(())
        })
        .unwrap();
        assert!(!done);
        assert_eq!(visits, 1);
    }

    #[test]
    fn test_registry() {
        let mut reg = BackendRegistry::new();
        reg.register("CPU", || Ok(Box::new(CpuRefBackend)));
        assert_eq!(reg.count(), 1);
        assert_eq!(reg.name(0), Some("CPU"));
        assert_eq!(reg.name(1), None);
        assert_eq!(reg.init_backend(0).unwrap().name(), "CPU");
        assert!(reg.init_backend(3).is_err());
    }
}
