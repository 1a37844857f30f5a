use std::fmt;

use crate::layout::Layout;
use crate::shape::Dim;

// OpKind — the closed set of operation kinds
//
// Per-kind dispatch (scheduling hints, lowering passes, kernel generation)
// is an exhaustive match over this enum, so adding an operation kind is a
// compile-time-checked, localized change.

/// Element-wise arithmetic between two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Element-wise unary functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Relu,
    Sqrt,
    Tanh,
    Abs,
    Neg,
}

/// Activation fused into a producing operation's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    None,
    Relu,
    Relu6,
}

impl Activation {
    /// Apply the fused activation to a single value.
    pub fn apply(&self, v: f32) -> f32 {
        match self {
            Activation::None => v,
            Activation::Relu => v.max(0.0),
            Activation::Relu6 => v.clamp(0.0, 6.0),
        }
    }
}

/// An operation kind with its operation-specific parameters.
///
/// Axis parameters are expressed in the canonical NHWC dimension order;
/// backends storing NCHW convert via [`Layout::physical_axis`].
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Broadcasting binary arithmetic with an optional fused activation.
    BinaryArithmetic {
        op: ArithmeticOp,
        activation: Activation,
    },
    /// Element-wise unary function.
    ElementwiseUnary { op: UnaryOp },
    /// `output = input × weightᵀ (+ bias)`, batch dims preserved.
    FullyConnected { activation: Activation },
    /// Concatenation along `axis`.
    Concat { axis: usize },
    /// Reinterpret to `target`; at most one `Dim::Dynamic` entry is filled
    /// from the input's element count at configure time.
    Reshape { target: Vec<Dim> },
    /// Scaled softmax over the last axis.
    Softmax { beta: f32 },
    /// Synthetic backend/layout conversion, created by lowering — never
    /// present in a loaded graph.
    Permute { from: Layout, to: Layout },
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            OpKind::BinaryArithmetic { .. } => "BinaryArithmetic",
            OpKind::ElementwiseUnary { .. } => "ElementwiseUnary",
            OpKind::FullyConnected { .. } => "FullyConnected",
            OpKind::Concat { .. } => "Concat",
            OpKind::Reshape { .. } => "Reshape",
            OpKind::Softmax { .. } => "Softmax",
            OpKind::Permute { .. } => "Permute",
        }
    }

    pub fn is_permute(&self) -> bool {
        matches!(self, OpKind::Permute { .. })
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
