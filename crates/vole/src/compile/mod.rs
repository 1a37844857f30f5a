pub mod lowering;
pub mod pass;
pub mod scheduler;

use std::collections::HashMap;
use std::sync::Arc;

use vole_core::{
    Backend, BackendContext, BackendRegistry, Error, Graph, Kernel, OpKind, OperandIndex,
    OperationIndex, Result, Tensor,
};

use crate::exec::permute::PermuteKernel;
use crate::exec::{ExecutablePlan, Job};
use self::scheduler::CostPolicy;

// Prepare — the single-threaded compile pipeline
//
// verify → rewrite passes → schedule → lower → per-backend tensor
// materialization → kernel generation → permute splicing. Any error here
// is fatal to the session; the caller re-prepares from scratch.

/// Compile `graph` into an executable plan over `backends`.
///
/// `hints` optionally pins operations to named backends; pass an empty map
/// for pure cost-driven assignment.
pub fn prepare(
    mut graph: Graph,
    backends: &[Arc<dyn Backend>],
    policy: &dyn CostPolicy,
    hints: &HashMap<OperationIndex, String>,
) -> Result<ExecutablePlan> {
    graph.verify()?;
    for mut p in pass::default_passes() {
        p.run(&mut graph)?;
    }

    let registry = BackendRegistry::new(backends)?;
    let resolution = scheduler::schedule(&graph, &registry, policy, hints)?;
    let lowered = lowering::lower(graph, &resolution, &registry)?;

    // One context per backend; every context materializes its tensors
    // before any kernel generation, since permutations read across
    // contexts.
    let mut contexts: HashMap<String, Box<dyn BackendContext>> = HashMap::new();
    for backend in registry.iter() {
        let mut context = backend.new_context();
        context.gen_tensors(&lowered)?;
        contexts.insert(backend.id().to_string(), context);
    }

    // Compute jobs come from each backend's kernel generator; a backend
    // claiming support it cannot deliver fails here, at prepare time.
    let mut kernel_lists: HashMap<usize, Vec<Box<dyn Kernel>>> = HashMap::new();
    for context in contexts.values_mut() {
        for (seq, kernels) in context.gen_kernels(&lowered)? {
            kernel_lists.insert(seq.0, kernels);
        }
    }

    let resolve = |operand: OperandIndex| -> Result<Arc<dyn Tensor>> {
        let info = lowered.lowering_info(operand)?;
        contexts
            .get(&info.backend)
            .and_then(|ctx| ctx.tensor(operand))
            .ok_or(Error::LoweringInvariant { operand })
    };

    // Permute jobs are engine-built: each bridges two contexts, reading
    // the producer's tensor and writing the consumer's.
    for (i, seq) in lowered.op_seqs.iter().enumerate() {
        if !seq.is_permute(&lowered.graph) {
            continue;
        }
        let op = lowered.graph.operation(seq.operations[0]);
        let OpKind::Permute { from, to } = &op.kind else {
            continue;
        };
        let src = resolve(op.inputs[0])?;
        let dst = resolve(op.outputs[0])?;
        let kernel: Box<dyn Kernel> = Box::new(PermuteKernel::new(src, dst, *from, *to));
        kernel_lists.insert(i, vec![kernel]);
    }

    let mut jobs: Vec<Option<Job>> = Vec::with_capacity(lowered.op_seqs.len());
    for (i, seq) in lowered.op_seqs.iter().enumerate() {
        let kernels = kernel_lists.remove(&i).ok_or_else(|| Error::Configuration {
            backend: seq.backend.clone(),
            reason: format!("no kernels generated for sequence {i}"),
        })?;
        jobs.push(Some(Job::new(
            vole_core::lowered::OpSequenceIndex(i),
            seq.backend.clone(),
            kernels,
        )));
    }

    let inputs = lowered
        .graph
        .inputs()
        .iter()
        .map(|&idx| resolve(idx))
        .collect::<Result<Vec<_>>>()?;
    let outputs = lowered
        .graph
        .outputs()
        .iter()
        .map(|&idx| resolve(idx))
        .collect::<Result<Vec<_>>>()?;

    let order = lowered.order.iter().map(|seq| seq.0).collect();
    let deps = lowered
        .deps
        .iter()
        .map(|d| d.iter().map(|seq| seq.0).collect())
        .collect();

    Ok(ExecutablePlan {
        lowered,
        jobs,
        order,
        deps,
        inputs,
        outputs,
    })
}
