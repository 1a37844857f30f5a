//! # vole-core
//!
//! Core primitives for Vole, an on-device neural-network inference engine.
//!
//! This crate provides:
//! - [`Graph`] / [`Operand`] / [`Operation`] — the index-arena dataflow graph
//! - [`Shape`] / [`Dim`] — tensor shapes with run-time-unknown dimensions
//! - [`Layout`] — dimension-ordering conventions (NHWC / NCHW)
//! - [`DType`] — element types (F16, F32, I32, U8)
//! - [`Backend`] / [`BackendContext`] / [`Kernel`] / [`Tensor`] — the
//!   capability traits every execution backend implements
//! - [`LoweredGraph`] / [`OpSequence`] — the per-backend execution plan
//!   produced by scheduling and lowering

pub mod backend;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod layout;
pub mod lowered;
pub mod op;
pub mod shape;
pub mod shape_inference;

pub use backend::{Backend, BackendContext, BackendRegistry, FunctionMap, Kernel, Tensor};
pub use dtype::DType;
pub use error::{Error, Result};
pub use graph::{Graph, Operand, OperandIndex, Operation, OperationIndex};
pub use layout::Layout;
pub use lowered::{LoweredGraph, LoweringInfo, OpSequence, OpSequenceIndex};
pub use op::{Activation, ArithmeticOp, OpKind, UnaryOp};
pub use shape::{Dim, Shape};
