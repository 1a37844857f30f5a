use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};
use crate::graph::{Graph, OperandIndex, OperationIndex};
use crate::layout::Layout;

// LoweredGraph — the backend-annotated execution plan
//
// Lowering groups the scheduled operations into op sequences (maximal runs
// of consecutive operations sharing backend and layout) and records, for
// every operand, which backend's memory holds it and in which layout. The
// permutation operations inserted at sequence boundaries live in the graph
// like any other operation, grouped into single-op permute sequences.

/// Index of an op sequence in its lowered graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpSequenceIndex(pub usize);

impl fmt::Display for OpSequenceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq{}", self.0)
    }
}

/// Where an operand lives after lowering: the backend whose memory holds
/// it and the layout its data is stored in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoweringInfo {
    pub backend: String,
    pub layout: Layout,
}

/// A maximal run of consecutive operations assigned to one backend with
/// one layout. The executor's unit of dispatch.
#[derive(Debug, Clone)]
pub struct OpSequence {
    pub operations: Vec<OperationIndex>,
    pub backend: String,
    pub layout: Layout,
    /// Operands read from outside the sequence, deduplicated, in first-use
    /// order.
    pub inputs: Vec<OperandIndex>,
    /// Operands visible outside the sequence (graph outputs or read by
    /// other sequences).
    pub outputs: Vec<OperandIndex>,
}

impl OpSequence {
    /// True for the synthetic single-op sequences holding a boundary
    /// permutation.
    pub fn is_permute(&self, graph: &Graph) -> bool {
        self.operations.len() == 1 && graph.operation(self.operations[0]).kind.is_permute()
    }
}

/// The complete lowered plan: the (rewritten) graph, its op sequences in a
/// deterministic topological order, and per-operand placement.
#[derive(Debug)]
pub struct LoweredGraph {
    pub graph: Graph,
    pub op_seqs: Vec<OpSequence>,
    /// Execution order over `op_seqs`.
    pub order: Vec<OpSequenceIndex>,
    /// For each op sequence, the sequences producing its inputs.
    pub deps: Vec<Vec<OpSequenceIndex>>,
    /// Backend/layout placement of every reachable operand.
    pub lower_info: HashMap<OperandIndex, LoweringInfo>,
}

impl LoweredGraph {
    /// Placement of `operand`; every operand referenced by the plan must
    /// have one.
    pub fn lowering_info(&self, operand: OperandIndex) -> Result<&LoweringInfo> {
        self.lower_info
            .get(&operand)
            .ok_or(Error::LoweringInvariant { operand })
    }

    pub fn op_seq(&self, idx: OpSequenceIndex) -> &OpSequence {
        &self.op_seqs[idx.0]
    }

    /// The sequence containing `op`.
    pub fn seq_of_op(&self, op: OperationIndex) -> Option<OpSequenceIndex> {
        self.op_seqs
            .iter()
            .position(|seq| seq.operations.contains(&op))
            .map(OpSequenceIndex)
    }

    /// The sequence producing `operand`, if it is operation-produced.
    pub fn producing_seq(&self, operand: OperandIndex) -> Option<OpSequenceIndex> {
        let producer = self.graph.operand(operand).producer?;
        self.seq_of_op(producer)
    }
}
