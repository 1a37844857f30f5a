use std::collections::HashMap;

use vole_core::{Backend, BackendRegistry, Error, Graph, OperationIndex, Result};

// Scheduler — one backend per operation, minimum estimated cost
//
// Operations are visited in topological order so every input's assignment
// is known when its consumer is scheduled. The cost policy is pluggable;
// ties break on registry position, which makes the whole assignment a
// deterministic function of (graph, registry order, policy).

/// Cost added when a candidate differs from every predecessor's backend,
/// standing in for the permutation a transfer would require.
const TRANSFER_PENALTY: u64 = 1000;

/// Estimates the cost of running `op` on `candidate`.
pub trait CostPolicy: Send + Sync {
    /// `position` is the candidate's index in the registry (its priority);
    /// `predecessors` holds the backends already assigned to the producers
    /// of `op`'s inputs.
    fn estimate(
        &self,
        graph: &Graph,
        op: OperationIndex,
        position: usize,
        candidate: &dyn Backend,
        predecessors: &[String],
    ) -> u64;
}

/// Default policy: stay on a predecessor's backend when possible, fall
/// back to registry priority order.
pub struct PreferPredecessor;

impl CostPolicy for PreferPredecessor {
    fn estimate(
        &self,
        _graph: &Graph,
        _op: OperationIndex,
        position: usize,
        candidate: &dyn Backend,
        predecessors: &[String],
    ) -> u64 {
        if predecessors.iter().any(|p| p == candidate.id()) {
            position as u64
        } else {
            TRANSFER_PENALTY + position as u64
        }
    }
}

/// The scheduler's output: a total map from operation to backend id.
#[derive(Debug, Default, Clone)]
pub struct BackendResolution {
    assignment: HashMap<OperationIndex, String>,
}

impl BackendResolution {
    pub fn assign(&mut self, op: OperationIndex, backend: &str) {
        self.assignment.insert(op, backend.to_string());
    }

    pub fn backend_of(&self, op: OperationIndex) -> Option<&str> {
        self.assignment.get(&op).map(String::as_str)
    }

    pub fn require(&self, op: OperationIndex) -> Result<&str> {
        self.backend_of(op)
            .ok_or_else(|| Error::msg(format!("operation {op} was never scheduled")))
    }
}

/// Assign a backend to every operation.
///
/// `hints` pins specific operations to a named backend; a hint is honored
/// only when that backend exists and supports the operation, otherwise
/// normal selection applies.
pub fn schedule(
    graph: &Graph,
    registry: &BackendRegistry,
    policy: &dyn CostPolicy,
    hints: &HashMap<OperationIndex, String>,
) -> Result<BackendResolution> {
    let mut resolution = BackendResolution::default();

    for op in graph.topo_order()? {
        // Backends of the operations feeding this one.
        let mut predecessors: Vec<String> = Vec::new();
        for &input in &graph.operation(op).inputs {
            if let Some(producer) = graph.operand(input).producer {
                if let Some(backend) = resolution.backend_of(producer) {
                    if !predecessors.iter().any(|p| p == backend) {
                        predecessors.push(backend.to_string());
                    }
                }
            }
        }

        if let Some(hinted) = hints.get(&op) {
            if let Some(backend) = registry.get(hinted) {
                let layout = backend.preferred_layout(graph, op);
                if backend.supports(graph, op, layout) {
                    resolution.assign(op, backend.id());
                    continue;
                }
            }
        }

        let mut best: Option<(u64, usize)> = None;
        for (position, backend) in registry.iter().enumerate() {
            let layout = backend.preferred_layout(graph, op);
            if !backend.supports(graph, op, layout) {
                continue;
            }
            let cost = policy.estimate(graph, op, position, backend.as_ref(), &predecessors);
            // Strict less keeps the earlier (higher-priority) candidate on
            // ties.
            if best.map_or(true, |(c, _)| cost < c) {
                best = Some((cost, position));
            }
        }

        match best {
            Some((_, position)) => {
                let backend = registry
                    .iter()
                    .nth(position)
                    .ok_or_else(|| Error::msg("registry position out of range"))?;
                resolution.assign(op, backend.id());
            }
            None => {
                return Err(Error::UnassignableOperation {
                    op,
                    kind: graph.operation(op).kind.name().to_string(),
                })
            }
        }
    }

    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vole_core::op::{OpKind, UnaryOp};
    use vole_core::{BackendContext, DType, Layout, Shape};

    /// Capability-only backend claiming the kinds in its list.
    struct Claiming {
        id: &'static str,
        kinds: Vec<&'static str>,
    }

    impl Backend for Claiming {
        fn id(&self) -> &str {
            self.id
        }
        fn supports(&self, graph: &Graph, op: OperationIndex, _layout: Layout) -> bool {
            self.kinds.contains(&graph.operation(op).kind.name())
        }
        fn preferred_layout(&self, _: &Graph, _: OperationIndex) -> Layout {
            Layout::NHWC
        }
        fn new_context(&self) -> Box<dyn BackendContext> {
            unimplemented!("scheduling-only test backend")
        }
    }

    fn chain_graph() -> (Graph, Vec<OperationIndex>) {
        let mut g = Graph::new();
        let a = g.add_operand(Shape::from_static(&[2]), DType::F32);
        let b = g.add_operand(Shape::from_static(&[2]), DType::F32);
        let c = g.add_operand(Shape::from_static(&[2]), DType::F32);
        let relu = OpKind::ElementwiseUnary { op: UnaryOp::Relu };
        let tanh = OpKind::ElementwiseUnary { op: UnaryOp::Tanh };
        let op0 = g.add_operation(relu, vec![a], vec![b]).unwrap();
        let op1 = g.add_operation(tanh, vec![b], vec![c]).unwrap();
        g.add_input(a);
        g.add_output(c);
        (g, vec![op0, op1])
    }

    #[test]
    fn test_prefers_predecessor_backend() {
        let (g, ops) = chain_graph();
        // Both backends support everything; the second is the only option
        // for nothing, so without the predecessor rule op1 would pick the
        // first. Pin op0 to the second via a hint and watch op1 follow.
        let a: Arc<dyn Backend> = Arc::new(Claiming {
            id: "one",
            kinds: vec!["ElementwiseUnary"],
        });
        let b: Arc<dyn Backend> = Arc::new(Claiming {
            id: "two",
            kinds: vec!["ElementwiseUnary"],
        });
        let registry = BackendRegistry::new(&[a, b]).unwrap();
        let mut hints = HashMap::new();
        hints.insert(ops[0], "two".to_string());

        let resolution = schedule(&g, &registry, &PreferPredecessor, &hints).unwrap();
        assert_eq!(resolution.backend_of(ops[0]), Some("two"));
        assert_eq!(resolution.backend_of(ops[1]), Some("two"));
    }

    #[test]
    fn test_tie_breaks_by_registry_order() {
        let (g, ops) = chain_graph();
        let a: Arc<dyn Backend> = Arc::new(Claiming {
            id: "one",
            kinds: vec!["ElementwiseUnary"],
        });
        let b: Arc<dyn Backend> = Arc::new(Claiming {
            id: "two",
            kinds: vec!["ElementwiseUnary"],
        });
        let registry = BackendRegistry::new(&[a, b]).unwrap();

        let resolution = schedule(&g, &registry, &PreferPredecessor, &HashMap::new()).unwrap();
        for op in ops {
            assert_eq!(resolution.backend_of(op), Some("one"));
        }
    }

    #[test]
    fn test_deterministic_assignment() {
        let (g, _) = chain_graph();
        let mk = || -> Vec<Arc<dyn Backend>> {
            vec![
                Arc::new(Claiming {
                    id: "one",
                    kinds: vec!["ElementwiseUnary"],
                }),
                Arc::new(Claiming {
                    id: "two",
                    kinds: vec!["ElementwiseUnary"],
                }),
            ]
        };
        let r1 = schedule(
            &g,
            &BackendRegistry::new(&mk()).unwrap(),
            &PreferPredecessor,
            &HashMap::new(),
        )
        .unwrap();
        let r2 = schedule(
            &g,
            &BackendRegistry::new(&mk()).unwrap(),
            &PreferPredecessor,
            &HashMap::new(),
        )
        .unwrap();
        for op in g.operation_indices() {
            assert_eq!(r1.backend_of(op), r2.backend_of(op));
        }
    }

    #[test]
    fn test_unassignable_operation() {
        let (g, ops) = chain_graph();
        let a: Arc<dyn Backend> = Arc::new(Claiming {
            id: "concat-only",
            kinds: vec!["Concat"],
        });
        let registry = BackendRegistry::new(&[a]).unwrap();

        let err = schedule(&g, &registry, &PreferPredecessor, &HashMap::new());
        match err {
            Err(Error::UnassignableOperation { op, .. }) => assert_eq!(op, ops[0]),
            other => panic!("expected UnassignableOperation, got {other:?}"),
        }
    }
}
