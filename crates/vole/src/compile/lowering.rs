use std::collections::{BTreeSet, HashMap};

use vole_core::bail;
use vole_core::lowered::{LoweredGraph, LoweringInfo, OpSequence, OpSequenceIndex};
use vole_core::{
    BackendRegistry, Error, Graph, Layout, OpKind, OperandIndex, OperationIndex, Result,
};

use super::scheduler::BackendResolution;

// Lowering — from scheduled graph to per-backend execution plan
//
// Walks the graph in topological order, grouping consecutive operations
// that share (backend, layout) into op sequences, then splices synthetic
// permutation operations onto every operand edge whose producer and
// consumer placements disagree. Graph inputs and outputs are pinned to the
// canonical NHWC layout so host buffers never see a backend's internal
// ordering.

struct SeqDraft {
    backend: String,
    layout: Layout,
    ops: Vec<OperationIndex>,
}

pub fn lower(
    mut graph: Graph,
    resolution: &BackendResolution,
    registry: &BackendRegistry,
) -> Result<LoweredGraph> {
    let topo = graph.topo_order()?;

    // Placement of each scheduled operation.
    let mut op_backend: HashMap<OperationIndex, String> = HashMap::new();
    let mut op_layout: HashMap<OperationIndex, Layout> = HashMap::new();
    for &op in &topo {
        let id = resolution.require(op)?;
        let backend = registry.get(id).ok_or_else(|| Error::Configuration {
            backend: id.to_string(),
            reason: "scheduled backend is not in the registry".to_string(),
        })?;
        op_layout.insert(op, backend.preferred_layout(&graph, op));
        op_backend.insert(op, id.to_string());
    }

    // Group consecutive same-placement operations into sequence drafts. A
    // placement change along the walk closes the current sequence; an
    // operation with no same-placement neighbor forms a singleton.
    let mut seqs: Vec<SeqDraft> = Vec::new();
    for &op in &topo {
        let backend = &op_backend[&op];
        let layout = op_layout[&op];
        match seqs.last_mut() {
            Some(seq) if &seq.backend == backend && seq.layout == layout => seq.ops.push(op),
            _ => seqs.push(SeqDraft {
                backend: backend.clone(),
                layout,
                ops: vec![op],
            }),
        }
    }

    // Operand placement: operation outputs take their producer's
    // placement; constants take their first consumer's; graph inputs are
    // pinned to NHWC on their first consumer's backend.
    let mut lower_info: HashMap<OperandIndex, LoweringInfo> = HashMap::new();
    for &op in &topo {
        let backend = op_backend[&op].clone();
        let layout = op_layout[&op];
        for &out in &graph.operation(op).outputs {
            lower_info.insert(
                out,
                LoweringInfo {
                    backend: backend.clone(),
                    layout,
                },
            );
        }
    }
    let default_backend = registry
        .iter()
        .next()
        .map(|b| b.id().to_string())
        .ok_or_else(|| Error::Configuration {
            backend: String::new(),
            reason: "backend set is empty".to_string(),
        })?;
    for idx in graph.operand_indices().collect::<Vec<_>>() {
        let operand = graph.operand(idx);
        if operand.producer.is_some() {
            continue;
        }
        let info = match operand.uses.first() {
            Some(first_use) if operand.is_constant() => LoweringInfo {
                backend: op_backend[first_use].clone(),
                layout: op_layout[first_use],
            },
            Some(first_use) => LoweringInfo {
                backend: op_backend[first_use].clone(),
                layout: Layout::NHWC,
            },
            None => LoweringInfo {
                backend: default_backend.clone(),
                layout: Layout::NHWC,
            },
        };
        lower_info.insert(idx, info);
    }

    // Graph outputs leave the engine in canonical order: a producer on a
    // channel-first layout is followed by a staged operand plus a
    // permutation back to NHWC.
    for out in graph.outputs().to_vec() {
        let info = lower_info
            .get(&out)
            .cloned()
            .ok_or(Error::LoweringInvariant { operand: out })?;
        if info.layout == Layout::NHWC {
            continue;
        }
        let producer = graph
            .operand(out)
            .producer
            .ok_or(Error::LoweringInvariant { operand: out })?;
        let staged = graph.add_operand(graph.operand(out).shape.clone(), graph.operand(out).dtype);
        graph.replace_output(producer, out, staged);
        for user in graph.operand(out).uses.clone() {
            graph.replace_input(user, out, staged);
        }
        let permute = graph.add_operation(
            OpKind::Permute {
                from: info.layout,
                to: Layout::NHWC,
            },
            vec![staged],
            vec![out],
        )?;
        lower_info.insert(staged, info.clone());
        lower_info.insert(
            out,
            LoweringInfo {
                backend: info.backend.clone(),
                layout: Layout::NHWC,
            },
        );
        op_backend.insert(permute, info.backend.clone());
        op_layout.insert(permute, Layout::NHWC);
        seqs.push(SeqDraft {
            backend: info.backend,
            layout: Layout::NHWC,
            ops: vec![permute],
        });
    }

    // Input-side boundaries: for every operand read under a placement
    // other than its own, splice exactly one permutation per (operand,
    // destination backend, destination layout) — consumers needing the
    // identical conversion share it.
    let mut shared: HashMap<(OperandIndex, String, Layout), OperandIndex> = HashMap::new();
    let compute_seqs = seqs.len();
    for s in 0..compute_seqs {
        let backend = seqs[s].backend.clone();
        let layout = seqs[s].layout;
        for op in seqs[s].ops.clone() {
            if graph.operation(op).kind.is_permute() {
                continue;
            }
            for input in graph.operation(op).inputs.clone() {
                let info = lower_info
                    .get(&input)
                    .cloned()
                    .ok_or(Error::LoweringInvariant { operand: input })?;
                if info.backend == backend && info.layout == layout {
                    continue;
                }
                let key = (input, backend.clone(), layout);
                let staged = match shared.get(&key) {
                    Some(&staged) => staged,
                    None => {
                        let staged = graph
                            .add_operand(graph.operand(input).shape.clone(), graph.operand(input).dtype);
                        let permute = graph.add_operation(
                            OpKind::Permute {
                                from: info.layout,
                                to: layout,
                            },
                            vec![input],
                            vec![staged],
                        )?;
                        lower_info.insert(
                            staged,
                            LoweringInfo {
                                backend: backend.clone(),
                                layout,
                            },
                        );
                        op_backend.insert(permute, backend.clone());
                        op_layout.insert(permute, layout);
                        seqs.push(SeqDraft {
                            backend: backend.clone(),
                            layout,
                            ops: vec![permute],
                        });
                        shared.insert(key, staged);
                        staged
                    }
                };
                graph.replace_input(op, input, staged);
            }
        }
    }

    // Finalize sequences: boundary inputs, visible outputs, dependencies.
    let mut seq_of: HashMap<OperationIndex, usize> = HashMap::new();
    for (i, draft) in seqs.iter().enumerate() {
        for &op in &draft.ops {
            seq_of.insert(op, i);
        }
    }

    let mut op_seqs: Vec<OpSequence> = Vec::with_capacity(seqs.len());
    for (i, draft) in seqs.iter().enumerate() {
        let mut inputs: Vec<OperandIndex> = Vec::new();
        let mut outputs: Vec<OperandIndex> = Vec::new();
        for &op in &draft.ops {
            for &inp in &graph.operation(op).inputs {
                let inside = graph
                    .operand(inp)
                    .producer
                    .map_or(false, |p| seq_of.get(&p) == Some(&i));
                if !inside && !inputs.contains(&inp) {
                    inputs.push(inp);
                }
            }
            for &out in &graph.operation(op).outputs {
                let visible = graph.outputs().contains(&out)
                    || graph
                        .operand(out)
                        .uses
                        .iter()
                        .any(|u| seq_of.get(u) != Some(&i));
                if visible && !outputs.contains(&out) {
                    outputs.push(out);
                }
            }
        }
        op_seqs.push(OpSequence {
            operations: draft.ops.clone(),
            backend: draft.backend.clone(),
            layout: draft.layout,
            inputs,
            outputs,
        });
    }

    let n = op_seqs.len();
    let mut deps: Vec<Vec<OpSequenceIndex>> = vec![Vec::new(); n];
    for (i, seq) in op_seqs.iter().enumerate() {
        for &inp in &seq.inputs {
            if let Some(producer) = graph.operand(inp).producer {
                let p = seq_of[&producer];
                if p != i && !deps[i].contains(&OpSequenceIndex(p)) {
                    deps[i].push(OpSequenceIndex(p));
                }
            }
        }
    }

    // Deterministic topological order over sequences.
    let mut pending: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, d) in deps.iter().enumerate() {
        for dep in d {
            dependents[dep.0].push(i);
        }
    }
    let mut ready: BTreeSet<usize> = pending
        .iter()
        .enumerate()
        .filter(|&(_, &p)| p == 0)
        .map(|(i, _)| i)
        .collect();
    let mut order: Vec<OpSequenceIndex> = Vec::with_capacity(n);
    while let Some(&next) = ready.iter().next() {
        ready.remove(&next);
        order.push(OpSequenceIndex(next));
        for &d in &dependents[next] {
            pending[d] -= 1;
            if pending[d] == 0 {
                ready.insert(d);
            }
        }
    }
    if order.len() != n {
        bail!("op sequence dependency graph contains a cycle");
    }

    // Every operand the plan touches must have a resolved placement.
    for op in graph.operation_indices() {
        let operation = graph.operation(op);
        for &operand in operation.inputs.iter().chain(&operation.outputs) {
            if !lower_info.contains_key(&operand) {
                return Err(Error::LoweringInvariant { operand });
            }
        }
    }
    for &operand in graph.inputs().iter().chain(graph.outputs()) {
        if !lower_info.contains_key(&operand) {
            return Err(Error::LoweringInvariant { operand });
        }
    }

    Ok(LoweredGraph {
        graph,
        op_seqs,
        order,
        deps,
        lower_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::scheduler::{schedule, PreferPredecessor};
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;
    use vole_core::op::{Activation, ArithmeticOp, UnaryOp};
    use vole_core::{Backend, DType, Shape};
    use vole_cpu::CpuBackend;

    fn two_backend_registry() -> BackendRegistry {
        let a: Arc<dyn Backend> = Arc::new(CpuBackend::new());
        let b: Arc<dyn Backend> = Arc::new(CpuBackend::with_layout("cpu-nchw", Layout::NCHW));
        BackendRegistry::new(&[a, b]).unwrap()
    }

    /// relu → add(chain), with the add pinned to the channel-first backend.
    fn mixed_graph() -> (Graph, StdHashMap<OperationIndex, String>) {
        let mut g = Graph::new();
        let input = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let mid = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let bias = g
            .add_constant(Shape::from_static(&[3]), DType::F32, vec![1.0, 2.0, 3.0])
            .unwrap();
        let out = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let relu = g
            .add_operation(
                OpKind::ElementwiseUnary { op: UnaryOp::Relu },
                vec![input],
                vec![mid],
            )
            .unwrap();
        let add = g
            .add_operation(
                OpKind::BinaryArithmetic {
                    op: ArithmeticOp::Add,
                    activation: Activation::None,
                },
                vec![mid, bias],
                vec![out],
            )
            .unwrap();
        g.add_input(input);
        g.add_output(out);

        let mut hints = StdHashMap::new();
        hints.insert(relu, "cpu".to_string());
        hints.insert(add, "cpu-nchw".to_string());
        (g, hints)
    }

    #[test]
    fn test_uniform_sequences() {
        let (g, hints) = mixed_graph();
        let registry = two_backend_registry();
        let resolution = schedule(&g, &registry, &PreferPredecessor, &hints).unwrap();
        let lowered = lower(g, &resolution, &registry).unwrap();

        for seq in &lowered.op_seqs {
            for &op in &seq.operations {
                for &operand in lowered.graph.operation(op).outputs.iter() {
                    let info = lowered.lowering_info(operand).unwrap();
                    assert_eq!(info.backend, seq.backend);
                    assert_eq!(info.layout, seq.layout);
                }
            }
        }
    }

    #[test]
    fn test_permute_only_on_crossing_edges() {
        let (g, hints) = mixed_graph();
        let registry = two_backend_registry();
        let resolution = schedule(&g, &registry, &PreferPredecessor, &hints).unwrap();
        let lowered = lower(g, &resolution, &registry).unwrap();
        let graph = &lowered.graph;

        for op in graph.operation_indices() {
            let operation = graph.operation(op);
            if operation.kind.is_permute() {
                continue;
            }
            // Each non-permute operation reads operands already in its own
            // placement, so no conversion hides inside a sequence.
            let seq = lowered.seq_of_op(op).unwrap();
            let seq = lowered.op_seq(seq);
            for &input in &operation.inputs {
                let info = lowered.lowering_info(input).unwrap();
                assert_eq!(info.backend, seq.backend, "operand {input} crosses backends");
                assert_eq!(info.layout, seq.layout, "operand {input} crosses layouts");
            }
        }

        // The relu output feeds the channel-first add (one permute) and the
        // graph output returns to NHWC (a second).
        let permutes = graph
            .operation_indices()
            .filter(|&op| graph.operation(op).kind.is_permute())
            .count();
        assert_eq!(permutes, 2);
    }

    #[test]
    fn test_shared_permute_for_identical_conversion() {
        // One NHWC producer feeding two channel-first consumers must
        // synthesize a single conversion.
        let mut g = Graph::new();
        let input = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let mid = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let o1 = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let o2 = g.add_operand(Shape::from_static(&[1, 2, 2, 3]), DType::F32);
        let relu = g
            .add_operation(
                OpKind::ElementwiseUnary { op: UnaryOp::Relu },
                vec![input],
                vec![mid],
            )
            .unwrap();
        let abs = g
            .add_operation(
                OpKind::ElementwiseUnary { op: UnaryOp::Abs },
                vec![mid],
                vec![o1],
            )
            .unwrap();
        let neg = g
            .add_operation(
                OpKind::ElementwiseUnary { op: UnaryOp::Neg },
                vec![mid],
                vec![o2],
            )
            .unwrap();
        g.add_input(input);
        g.add_output(o1);
        g.add_output(o2);

        let mut hints = StdHashMap::new();
        hints.insert(relu, "cpu".to_string());
        hints.insert(abs, "cpu-nchw".to_string());
        hints.insert(neg, "cpu-nchw".to_string());

        let registry = two_backend_registry();
        let resolution = schedule(&g, &registry, &PreferPredecessor, &hints).unwrap();
        let lowered = lower(g, &resolution, &registry).unwrap();

        // mid feeds both consumers through exactly one inbound permute;
        // two more bring o1/o2 back to NHWC for the host.
        let inbound = lowered
            .graph
            .operation_indices()
            .filter(|&op| {
                let operation = lowered.graph.operation(op);
                operation.kind.is_permute()
                    && matches!(
                        operation.kind,
                        OpKind::Permute {
                            from: Layout::NHWC,
                            to: Layout::NCHW
                        }
                    )
            })
            .count();
        assert_eq!(inbound, 1);
    }

    #[test]
    fn test_single_backend_no_permutes() {
        let (g, _) = mixed_graph();
        let backend: Arc<dyn Backend> = Arc::new(CpuBackend::new());
        let registry = BackendRegistry::new(&[backend]).unwrap();
        let resolution =
            schedule(&g, &registry, &PreferPredecessor, &StdHashMap::new()).unwrap();
        let lowered = lower(g, &resolution, &registry).unwrap();

        assert!(lowered
            .graph
            .operation_indices()
            .all(|op| !lowered.graph.operation(op).kind.is_permute()));
        assert_eq!(lowered.op_seqs.len(), 1);
    }

    #[test]
    fn test_order_respects_deps() {
        let (g, hints) = mixed_graph();
        let registry = two_backend_registry();
        let resolution = schedule(&g, &registry, &PreferPredecessor, &hints).unwrap();
        let lowered = lower(g, &resolution, &registry).unwrap();

        let position: StdHashMap<usize, usize> = lowered
            .order
            .iter()
            .enumerate()
            .map(|(pos, seq)| (seq.0, pos))
            .collect();
        for (i, deps) in lowered.deps.iter().enumerate() {
            for dep in deps {
                assert!(position[&dep.0] < position[&i]);
            }
        }
    }
}
