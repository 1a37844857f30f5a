use std::collections::BTreeSet;
use std::fmt;

use crate::bail;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::op::OpKind;
use crate::shape::Shape;

// Graph — the operand/operation dataflow graph
//
// Operands (tensors) and operations are stored in flat arenas and referred
// to by index. Every operand records its single producer and all of its
// uses, so the def/use chains needed by lowering and the permutation passes
// are maintained incrementally as operations are added or rewired.

/// Index of an operand in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperandIndex(pub usize);

/// Index of an operation in its graph's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationIndex(pub usize);

impl fmt::Display for OperandIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for OperationIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A tensor value in the graph: shape, element type, optional constant
/// payload, and its def/use wiring.
#[derive(Debug, Clone)]
pub struct Operand {
    pub dtype: DType,
    /// Canonical (NHWC-space) shape. May contain dynamic dimensions.
    pub shape: Shape,
    /// Constant payload, present for weights and other load-time data.
    pub data: Option<Vec<f32>>,
    /// The operation writing this operand, if any.
    pub producer: Option<OperationIndex>,
    /// Operations reading this operand, in insertion order.
    pub uses: Vec<OperationIndex>,
}

impl Operand {
    pub fn is_constant(&self) -> bool {
        self.data.is_some()
    }
}

/// A node in the graph: an operation kind applied to input operands,
/// writing output operands.
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: OpKind,
    pub inputs: Vec<OperandIndex>,
    pub outputs: Vec<OperandIndex>,
}

/// The dataflow graph handed to `prepare`.
///
/// Graph inputs and outputs are ordered; that order defines the positional
/// binding of host buffers at execution time.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    operands: Vec<Operand>,
    operations: Vec<Operation>,
    inputs: Vec<OperandIndex>,
    outputs: Vec<OperandIndex>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// Add a non-constant operand.
    pub fn add_operand(&mut self, shape: Shape, dtype: DType) -> OperandIndex {
        let idx = OperandIndex(self.operands.len());
        self.operands.push(Operand {
            dtype,
            shape,
            data: None,
            producer: None,
            uses: Vec::new(),
        });
        idx
    }

    /// Add a constant operand with its payload. The payload length must
    /// match the (static) shape's element count.
    pub fn add_constant(
        &mut self,
        shape: Shape,
        dtype: DType,
        data: Vec<f32>,
    ) -> Result<OperandIndex> {
        let expected = shape.num_elements().ok_or_else(|| {
            Error::msg(format!("constant operand cannot have dynamic shape {shape}"))
        })?;
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape,
                expected,
                got: data.len(),
            });
        }
        let idx = OperandIndex(self.operands.len());
        self.operands.push(Operand {
            dtype,
            shape,
            data: Some(data),
            producer: None,
            uses: Vec::new(),
        });
        Ok(idx)
    }

    /// Mark an operand as a graph input. Order of calls defines the
    /// positional input order.
    pub fn add_input(&mut self, operand: OperandIndex) {
        self.inputs.push(operand);
    }

    /// Mark an operand as a graph output. Order of calls defines the
    /// positional output order.
    pub fn add_output(&mut self, operand: OperandIndex) {
        self.outputs.push(operand);
    }

    /// Add an operation and wire the def/use chains of its operands.
    pub fn add_operation(
        &mut self,
        kind: OpKind,
        inputs: Vec<OperandIndex>,
        outputs: Vec<OperandIndex>,
    ) -> Result<OperationIndex> {
        let idx = OperationIndex(self.operations.len());
        for &i in &inputs {
            if i.0 >= self.operands.len() {
                bail!("operation {idx} references unknown input operand {i}");
            }
        }
        for &o in &outputs {
            let operand = self
                .operands
                .get(o.0)
                .ok_or_else(|| Error::msg(format!("operation {idx} references unknown output operand {o}")))?;
            if operand.producer.is_some() {
                bail!("operand {o} already has a producer");
            }
            if operand.is_constant() {
                bail!("operand {o} is constant and cannot be an operation output");
            }
        }
        for &i in &inputs {
            self.operands[i.0].uses.push(idx);
        }
        for &o in &outputs {
            self.operands[o.0].producer = Some(idx);
        }
        self.operations.push(Operation {
            kind,
            inputs,
            outputs,
        });
        Ok(idx)
    }

    pub fn operand(&self, idx: OperandIndex) -> &Operand {
        &self.operands[idx.0]
    }

    pub fn operand_mut(&mut self, idx: OperandIndex) -> &mut Operand {
        &mut self.operands[idx.0]
    }

    pub fn operation(&self, idx: OperationIndex) -> &Operation {
        &self.operations[idx.0]
    }

    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }

    pub fn num_operations(&self) -> usize {
        self.operations.len()
    }

    pub fn inputs(&self) -> &[OperandIndex] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OperandIndex] {
        &self.outputs
    }

    pub fn operand_indices(&self) -> impl Iterator<Item = OperandIndex> {
        (0..self.operands.len()).map(OperandIndex)
    }

    pub fn operation_indices(&self) -> impl Iterator<Item = OperationIndex> {
        (0..self.operations.len()).map(OperationIndex)
    }

    /// Replace every occurrence of `old` in `op`'s input list with `new`,
    /// keeping the use chains consistent.
    pub fn replace_input(&mut self, op: OperationIndex, old: OperandIndex, new: OperandIndex) {
        let operation = &mut self.operations[op.0];
        let mut replaced = false;
        for input in operation.inputs.iter_mut() {
            if *input == old {
                *input = new;
                replaced = true;
            }
        }
        if replaced {
            self.operands[old.0].uses.retain(|&u| u != op);
            if !self.operands[new.0].uses.contains(&op) {
                self.operands[new.0].uses.push(op);
            }
        }
    }

    /// Replace every occurrence of `old` in `op`'s output list with `new`,
    /// moving the producer link.
    pub fn replace_output(&mut self, op: OperationIndex, old: OperandIndex, new: OperandIndex) {
        let operation = &mut self.operations[op.0];
        let mut replaced = false;
        for output in operation.outputs.iter_mut() {
            if *output == old {
                *output = new;
                replaced = true;
            }
        }
        if replaced {
            self.operands[old.0].producer = None;
            self.operands[new.0].producer = Some(op);
        }
    }

    /// Operations in a deterministic topological order (Kahn's algorithm,
    /// ready set visited in ascending index order).
    pub fn topo_order(&self) -> Result<Vec<OperationIndex>> {
        let mut pending: Vec<usize> = vec![0; self.operations.len()];
        for (i, op) in self.operations.iter().enumerate() {
            let mut seen = BTreeSet::new();
            for &input in &op.inputs {
                if let Some(producer) = self.operands[input.0].producer {
                    // Count each producing operation once, even if it feeds
                    // several of this operation's inputs.
                    if seen.insert(producer) {
                        pending[i] += 1;
                    }
                }
            }
        }

        let mut ready: BTreeSet<usize> = pending
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.operations.len());

        while let Some(&next) = ready.iter().next() {
            ready.remove(&next);
            order.push(OperationIndex(next));
            // Each consumer is released once per completed producer, no
            // matter how many operands connect the pair.
            let mut released = BTreeSet::new();
            for &output in &self.operations[next].outputs {
                for &user in &self.operands[output.0].uses {
                    released.insert(user.0);
                }
            }
            for user in released {
                pending[user] -= 1;
                if pending[user] == 0 {
                    ready.insert(user);
                }
            }
        }

        if order.len() != self.operations.len() {
            bail!("graph contains a cycle");
        }
        Ok(order)
    }

    /// Structural validation: every input/output index in range, every
    /// graph output reachable, no cycles.
    pub fn verify(&self) -> Result<()> {
        for &input in &self.inputs {
            if input.0 >= self.operands.len() {
                bail!("graph input {input} is not a known operand");
            }
        }
        for &output in &self.outputs {
            if output.0 >= self.operands.len() {
                bail!("graph output {output} is not a known operand");
            }
            let operand = &self.operands[output.0];
            if operand.producer.is_none() && !operand.is_constant() && !self.inputs.contains(&output)
            {
                bail!("graph output {output} is never produced");
            }
        }
        self.topo_order()?;
        Ok(())
    }
}
