use std::sync::Arc;

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::graph::{Graph, OperandIndex, OperationIndex};
use crate::layout::Layout;
use crate::lowered::{LoweredGraph, OpSequenceIndex};
use crate::shape::Shape;

// Backend traits — the seam between the engine and execution providers
//
// A Backend answers capability queries during scheduling and hands out a
// fresh BackendContext per prepared plan. The context materializes tensors
// for the operands assigned to its backend and generates one kernel list
// per op sequence. Everything crosses this seam as trait objects so new
// backends plug in without touching the engine.

/// A device-resident tensor.
///
/// `shape()` reports the tensor's physical shape: the canonical shape
/// reordered into the layout the owning backend chose for it. Host access
/// always goes through `f32` slices regardless of the stored element type.
pub trait Tensor: Send + Sync {
    /// Element type of the stored data.
    fn dtype(&self) -> DType;

    /// Physical shape, in the tensor's own layout ordering.
    fn shape(&self) -> Shape;

    /// Storage layout of rank-4 data.
    fn layout(&self) -> Layout;

    /// Replace the physical shape, reallocating storage if the element
    /// count changes. Only valid on dynamic tensors once prepared.
    fn set_shape(&self, shape: &Shape) -> Result<()>;

    /// True if this tensor's extents may change between runs.
    fn is_dynamic(&self) -> bool;

    /// Copy the tensor's contents to the host.
    fn read(&self) -> Result<Vec<f32>>;

    /// Copy host data into the tensor. The slice length must match the
    /// current element count.
    fn write(&self, data: &[f32]) -> Result<()>;
}

/// A configured unit of device work for one operation.
///
/// `configure` re-resolves output extents from the current input extents
/// and must be re-run whenever an upstream shape changed; `run` assumes a
/// prior successful `configure`.
pub trait Kernel: Send {
    fn configure(&mut self) -> Result<()>;
    fn run(&mut self) -> Result<()>;

    /// The tensor bound to output slot `index`.
    fn output(&self, index: usize) -> Option<Arc<dyn Tensor>>;
}

/// Kernel lists produced by a context, one entry per op sequence assigned
/// to its backend.
pub type FunctionMap = Vec<(OpSequenceIndex, Vec<Box<dyn Kernel>>)>;

/// Per-plan state of one backend: its tensors and kernel generators.
pub trait BackendContext: Send {
    /// Materialize tensors for every operand assigned to this context's
    /// backend, honoring the layouts recorded in the lowered graph.
    fn gen_tensors(&mut self, lowered: &LoweredGraph) -> Result<()>;

    /// Generate kernels for every non-permute op sequence assigned to this
    /// context's backend. Requires `gen_tensors` on all contexts first.
    fn gen_kernels(&mut self, lowered: &LoweredGraph) -> Result<FunctionMap>;

    /// Look up the tensor materialized for `operand`, if this context owns
    /// one.
    fn tensor(&self, operand: OperandIndex) -> Option<Arc<dyn Tensor>>;
}

/// An execution provider: capability queries plus a context factory.
pub trait Backend: Send + Sync {
    /// Stable identifier, unique within a registry.
    fn id(&self) -> &str;

    /// Whether this backend can execute `op` with operand data stored in
    /// `layout`.
    fn supports(&self, graph: &Graph, op: OperationIndex, layout: Layout) -> bool;

    /// The layout this backend wants for `op`'s operands.
    fn preferred_layout(&self, graph: &Graph, op: OperationIndex) -> Layout;

    /// A fresh per-plan context.
    fn new_context(&self) -> Box<dyn BackendContext>;
}

/// An ordered set of backends. Order is significant: it is the scheduler's
/// tie-break, so the same registry always yields the same assignment.
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRegistry {
    /// Build a registry, rejecting duplicate backend ids.
    pub fn new(backends: &[Arc<dyn Backend>]) -> Result<Self> {
        if backends.is_empty() {
            return Err(Error::Configuration {
                backend: String::new(),
                reason: "backend set is empty".to_string(),
            });
        }
        for (i, b) in backends.iter().enumerate() {
            if backends[..i].iter().any(|other| other.id() == b.id()) {
                return Err(Error::Configuration {
                    backend: b.id().to_string(),
                    reason: "duplicate backend id".to_string(),
                });
            }
        }
        Ok(BackendRegistry {
            backends: backends.to_vec(),
        })
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Backend>> {
        self.backends.iter().find(|b| b.id() == id)
    }

    /// Position of `id` in registry order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.backends.iter().position(|b| b.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Backend>> {
        self.backends.iter()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake(&'static str);

    impl Backend for Fake {
        fn id(&self) -> &str {
            self.0
        }
        fn supports(&self, _: &Graph, _: OperationIndex, _: Layout) -> bool {
            true
        }
        fn preferred_layout(&self, _: &Graph, _: OperationIndex) -> Layout {
            Layout::NHWC
        }
        fn new_context(&self) -> Box<dyn BackendContext> {
            unimplemented!("capability-only test backend")
        }
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let a: Arc<dyn Backend> = Arc::new(Fake("cpu"));
        let b: Arc<dyn Backend> = Arc::new(Fake("cpu"));
        let err = BackendRegistry::new(&[a, b]);
        assert!(matches!(err, Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_registry_order_is_position() {
        let a: Arc<dyn Backend> = Arc::new(Fake("cpu"));
        let b: Arc<dyn Backend> = Arc::new(Fake("ref"));
        let reg = BackendRegistry::new(&[a, b]).unwrap();
        assert_eq!(reg.position("cpu"), Some(0));
        assert_eq!(reg.position("ref"), Some(1));
        assert_eq!(reg.len(), 2);
        assert!(reg.get("gpu").is_none());
    }

    #[test]
    fn test_registry_rejects_empty() {
        assert!(BackendRegistry::new(&[]).is_err());
    }
}
