//! # vole
//!
//! An on-device neural-network inference engine. Vole takes a loaded
//! operation graph and a prioritized list of execution backends, compiles
//! the graph into a per-backend plan (backend assignment, layout
//! conversion, memory planning, kernel generation), and runs it with
//! support for dynamically shaped inputs.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vole::{CpuBackend, DType, Graph, OpKind, Session, Shape, UnaryOp};
//! use vole_core::Backend;
//!
//! # fn main() -> vole::Result<()> {
//! let mut graph = Graph::new();
//! let input = graph.add_operand(Shape::from_static(&[4]), DType::F32);
//! let output = graph.add_operand(Shape::from_static(&[4]), DType::F32);
//! graph.add_operation(
//!     OpKind::ElementwiseUnary { op: UnaryOp::Relu },
//!     vec![input],
//!     vec![output],
//! )?;
//! graph.add_input(input);
//! graph.add_output(output);
//!
//! let backends: Vec<Arc<dyn Backend>> = vec![Arc::new(CpuBackend::new())];
//! let mut session = Session::prepare(graph, &backends)?;
//! let outputs = session.run(&[&[-1.0, 2.0, -3.0, 4.0]])?;
//! assert_eq!(outputs[0], vec![0.0, 2.0, 0.0, 4.0]);
//! # Ok(())
//! # }
//! ```

pub mod compile;
pub mod exec;
pub mod session;

pub use compile::scheduler::{BackendResolution, CostPolicy, PreferPredecessor};
pub use exec::observer::{ExecutionObserver, ProfileObserver, ProfileReport};
pub use exec::{ExecutablePlan, ExecutorKind};
pub use session::Session;

pub use vole_core::{
    Activation, ArithmeticOp, Backend, DType, Dim, Error, Graph, Layout, OpKind, OperandIndex,
    OperationIndex, Result, Shape, UnaryOp,
};
pub use vole_cpu::CpuBackend;
