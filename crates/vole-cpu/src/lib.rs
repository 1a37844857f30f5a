//! # vole-cpu
//!
//! The reference CPU backend for Vole. Computes every operation kind over
//! host `f32` buffers, with a liveness-based arena planner for static
//! intermediate tensors and `rayon`-parallel inner loops where the work is
//! wide enough to pay for it.
//!
//! [`CpuBackend::new`] yields the default channel-last instance; tests and
//! heterogeneous setups can add a second instance under a different id and
//! layout via [`CpuBackend::with_layout`].

pub mod kernels;
pub mod planner;
pub mod tensor;

mod context;
mod generator;

pub use context::CpuContext;
pub use tensor::CpuTensor;

use vole_core::{Backend, BackendContext, Graph, Layout, OpKind, OperationIndex};

pub struct CpuBackend {
    id: String,
    layout: Layout,
}

impl CpuBackend {
    /// The default CPU backend: id `"cpu"`, channel-last storage.
    pub fn new() -> Self {
        CpuBackend {
            id: "cpu".to_string(),
            layout: Layout::NHWC,
        }
    }

    /// A CPU backend instance with a distinct id and storage layout.
    pub fn with_layout(id: &str, layout: Layout) -> Self {
        CpuBackend {
            id: id.to_string(),
            layout,
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        CpuBackend::new()
    }
}

impl Backend for CpuBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn supports(&self, graph: &Graph, op: OperationIndex, _layout: Layout) -> bool {
        let operation = graph.operation(op);
        if matches!(operation.kind, OpKind::Permute { .. }) {
            return false;
        }
        // The reference kernels compute in f32 (widening f16); integer
        // operands would need quantized kernels this backend does not have.
        operation
            .inputs
            .iter()
            .chain(&operation.outputs)
            .all(|&idx| graph.operand(idx).dtype.is_float())
    }

    fn preferred_layout(&self, _graph: &Graph, _op: OperationIndex) -> Layout {
        self.layout
    }

    fn new_context(&self) -> Box<dyn BackendContext> {
        Box::new(CpuContext::new(&self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::op::{Activation, ArithmeticOp};
    use vole_core::{DType, Shape};

    #[test]
    fn test_supports_float_arithmetic() {
        let mut g = Graph::new();
        let a = g.add_operand(Shape::from_static(&[2]), DType::F32);
        let b = g.add_operand(Shape::from_static(&[2]), DType::F32);
        let c = g.add_operand(Shape::from_static(&[2]), DType::F32);
        let op = g
            .add_operation(
                OpKind::BinaryArithmetic {
                    op: ArithmeticOp::Add,
                    activation: Activation::None,
                },
                vec![a, b],
                vec![c],
            )
            .unwrap();

        let backend = CpuBackend::new();
        assert!(backend.supports(&g, op, Layout::NHWC));
        assert_eq!(backend.preferred_layout(&g, op), Layout::NHWC);
    }

    #[test]
    fn test_rejects_integer_operands() {
        let mut g = Graph::new();
        let a = g.add_operand(Shape::from_static(&[2]), DType::I32);
        let b = g.add_operand(Shape::from_static(&[2]), DType::I32);
        let c = g.add_operand(Shape::from_static(&[2]), DType::I32);
        let op = g
            .add_operation(
                OpKind::BinaryArithmetic {
                    op: ArithmeticOp::Add,
                    activation: Activation::None,
                },
                vec![a, b],
                vec![c],
            )
            .unwrap();

        assert!(!CpuBackend::new().supports(&g, op, Layout::NHWC));
    }

    #[test]
    fn test_rejects_permute() {
        let mut g = Graph::new();
        let a = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let b = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let op = g
            .add_operation(
                OpKind::Permute {
                    from: Layout::NHWC,
                    to: Layout::NCHW,
                },
                vec![a],
                vec![b],
            )
            .unwrap();

        assert!(!CpuBackend::new().supports(&g, op, Layout::NHWC));
    }
}
