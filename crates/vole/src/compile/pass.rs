use vole_core::shape::Dim;
use vole_core::shape_inference;
use vole_core::{Error, Graph, OpKind, Result, Shape};

// Graph-rewrite passes run before scheduling and sequence grouping
//
// Each pass is a visitor over the operation kind set; normalizations live
// here rather than being special-cased inside lowering or the kernels.

pub trait OperationPass {
    fn name(&self) -> &'static str;
    fn run(&mut self, graph: &mut Graph) -> Result<()>;
}

/// The standard pass pipeline, in run order.
pub fn default_passes() -> Vec<Box<dyn OperationPass>> {
    vec![
        Box::new(ExpandBroadcastRankPass),
        Box::new(StaticShapeInferencePass),
    ]
}

/// Pad the lower-rank side of a broadcasting binary arithmetic operation
/// with leading 1-extents until both inputs agree on rank.
///
/// Right-aligned broadcasting makes this a no-op semantically, but it
/// keeps every operand of a rank-4 operation at rank 4, so a channel-first
/// backend sees an unambiguous dimension permutation for all of them. An
/// operand is only padded when this operation is its sole consumer and it
/// is not a graph input or output, so no other reader observes the new
/// rank.
pub struct ExpandBroadcastRankPass;

impl OperationPass for ExpandBroadcastRankPass {
    fn name(&self) -> &'static str {
        "expand-broadcast-rank"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<()> {
        for op in graph.operation_indices() {
            if !matches!(
                graph.operation(op).kind,
                OpKind::BinaryArithmetic { .. }
            ) {
                continue;
            }
            let inputs = graph.operation(op).inputs.clone();
            let max_rank = inputs
                .iter()
                .map(|&i| graph.operand(i).shape.rank())
                .max()
                .unwrap_or(0);

            for &input in &inputs {
                let operand = graph.operand(input);
                let rank = operand.shape.rank();
                if rank == max_rank
                    || operand.uses.len() != 1
                    || graph.inputs().contains(&input)
                    || graph.outputs().contains(&input)
                {
                    continue;
                }
                let mut dims = vec![Dim::Fixed(1); max_rank - rank];
                dims.extend_from_slice(operand.shape.dims());
                graph.operand_mut(input).shape = Shape::new(dims);
            }
        }
        Ok(())
    }
}

/// Propagate static shapes through the graph once, refining declared
/// operand shapes and rejecting statically visible mismatches. Dynamic
/// dimensions flow through untouched and are resolved per run during
/// Configuring.
pub struct StaticShapeInferencePass;

impl OperationPass for StaticShapeInferencePass {
    fn name(&self) -> &'static str {
        "static-shape-inference"
    }

    fn run(&mut self, graph: &mut Graph) -> Result<()> {
        for op in graph.topo_order()? {
            let operation = graph.operation(op);
            let input_shapes: Vec<Shape> = operation
                .inputs
                .iter()
                .map(|&i| graph.operand(i).shape.clone())
                .collect();
            let outputs = operation.outputs.clone();
            let inferred = shape_inference::infer(&operation.kind, &input_shapes)?;

            for &output in &outputs {
                let declared = graph.operand(output).shape.clone();
                let merged = merge(&declared, &inferred)?;
                graph.operand_mut(output).shape = merged;
            }
        }
        Ok(())
    }
}

/// Combine a declared shape with an inferred one: fixed extents must
/// agree; a fixed extent refines a dynamic one.
fn merge(declared: &Shape, inferred: &Shape) -> Result<Shape> {
    if declared.rank() != inferred.rank() {
        // The front end may declare a placeholder shape for a dynamic
        // result; the inferred rank wins unless both sides are static.
        if declared.is_dynamic() || inferred.is_dynamic() {
            return Ok(inferred.clone());
        }
        return Err(Error::ShapeMismatch {
            expected: declared.clone(),
            got: inferred.clone(),
        });
    }

    let dims = declared
        .dims()
        .iter()
        .zip(inferred.dims())
        .map(|(&d, &i)| match (d, i) {
            (Dim::Fixed(a), Dim::Fixed(b)) if a != b => Err(Error::ShapeMismatch {
                expected: declared.clone(),
                got: inferred.clone(),
            }),
            (Dim::Fixed(a), _) => Ok(Dim::Fixed(a)),
            (Dim::Dynamic, other) => Ok(other),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Shape::new(dims))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::op::{Activation, ArithmeticOp};
    use vole_core::DType;

    #[test]
    fn test_expand_broadcast_rank() {
        let mut g = Graph::new();
        let lhs = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let rhs = g
            .add_constant(Shape::from_static(&[3]), DType::F32, vec![1.0, 2.0, 3.0])
            .unwrap();
        let out = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        g.add_operation(
            OpKind::BinaryArithmetic {
                op: ArithmeticOp::Add,
                activation: Activation::None,
            },
            vec![lhs, rhs],
            vec![out],
        )
        .unwrap();
        g.add_input(lhs);
        g.add_output(out);

        ExpandBroadcastRankPass.run(&mut g).unwrap();
        assert_eq!(g.operand(rhs).shape, Shape::from_static(&[1, 1, 1, 3]));
        // The rank-4 side is untouched.
        assert_eq!(g.operand(lhs).shape, Shape::from_static(&[1, 2, 2, 3]));
    }

    #[test]
    fn test_shared_operand_not_expanded() {
        let mut g = Graph::new();
        let lhs = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let shared = g
            .add_constant(Shape::from_static(&[3]), DType::F32, vec![1.0, 2.0, 3.0])
            .unwrap();
        let out1 = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let out2 = g.add_operand(Shape::from_static(&[3]), DType::F32);
        let add = OpKind::BinaryArithmetic {
            op: ArithmeticOp::Add,
            activation: Activation::None,
        };
        g.add_operation(add.clone(), vec![lhs, shared], vec![out1])
            .unwrap();
        g.add_operation(add, vec![shared, shared], vec![out2])
            .unwrap();

        ExpandBroadcastRankPass.run(&mut g).unwrap();
        assert_eq!(g.operand(shared).shape, Shape::from_static(&[3]));
    }

    #[test]
    fn test_static_inference_refines_dynamic_declaration() {
        let mut g = Graph::new();
        let input = g.add_operand(Shape::from_static(&[2, 4]), DType::F32);
        let out = g.add_operand(Shape::new(vec![Dim::Dynamic, Dim::Dynamic]), DType::F32);
        g.add_operation(
            OpKind::Softmax { beta: 1.0 },
            vec![input],
            vec![out],
        )
        .unwrap();

        StaticShapeInferencePass.run(&mut g).unwrap();
        assert_eq!(g.operand(out).shape, Shape::from_static(&[2, 4]));
    }

    #[test]
    fn test_static_inference_rejects_mismatch() {
        let mut g = Graph::new();
        let a = g.add_operand(Shape::from_static(&[3]), DType::F32);
        let b = g.add_operand(Shape::from_static(&[4]), DType::F32);
        let out = g.add_operand(Shape::from_static(&[4]), DType::F32);
        g.add_operation(
            OpKind::BinaryArithmetic {
                op: ArithmeticOp::Add,
                activation: Activation::None,
            },
            vec![a, b],
            vec![out],
        )
        .unwrap();

        assert!(StaticShapeInferencePass.run(&mut g).is_err());
    }
}
