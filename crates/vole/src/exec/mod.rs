pub mod linear;
pub mod observer;
pub mod parallel;
pub mod permute;

use std::sync::Arc;

use vole_core::lowered::{LoweredGraph, OpSequenceIndex};
use vole_core::{Error, Kernel, Result, Tensor};

use self::observer::ExecutionObservee;

// Execution — jobs, the prepared plan, and the executor seam
//
// A Job is one op sequence's kernel list; the plan owns every job plus the
// dependency structure between them. Executors differ only in how they
// walk that structure: the linear one follows the lowered order on the
// calling thread, the parallel one runs independent jobs concurrently.
// Both see the same jobs and tensors, so their outputs are identical.

/// One op sequence's worth of runnable work.
pub struct Job {
    pub seq: OpSequenceIndex,
    pub backend: String,
    kernels: Vec<Box<dyn Kernel>>,
}

impl Job {
    pub fn new(seq: OpSequenceIndex, backend: String, kernels: Vec<Box<dyn Kernel>>) -> Self {
        Job {
            seq,
            backend,
            kernels,
        }
    }

    /// Re-resolve output shapes from current input shapes. Failures are
    /// dynamic-shape errors: they fail this run and leave the plan intact.
    pub fn configure(&mut self) -> Result<()> {
        for kernel in self.kernels.iter_mut() {
            kernel.configure().map_err(|e| match e {
                Error::DynamicShape(_) => e,
                other => Error::DynamicShape(other.to_string()),
            })?;
        }
        Ok(())
    }

    /// Run the kernels in lowering order. Failures fail this run only.
    pub fn run(&mut self) -> Result<()> {
        for kernel in self.kernels.iter_mut() {
            kernel.run().map_err(|e| {
                if e.is_retryable() {
                    e
                } else {
                    Error::KernelExecution(e.to_string())
                }
            })?;
        }
        Ok(())
    }
}

/// A prepared session's executable state: the lowered graph, one job per
/// op sequence, and the tensors bound to graph inputs and outputs.
pub struct ExecutablePlan {
    pub lowered: LoweredGraph,
    /// Indexed by op sequence; `None` only while a job is checked out by
    /// the parallel executor.
    pub(crate) jobs: Vec<Option<Job>>,
    /// Execution order as op-sequence indices.
    pub(crate) order: Vec<usize>,
    /// Producer sequences of each sequence, by index.
    pub(crate) deps: Vec<Vec<usize>>,
    pub(crate) inputs: Vec<Arc<dyn Tensor>>,
    pub(crate) outputs: Vec<Arc<dyn Tensor>>,
}

impl ExecutablePlan {
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn input_tensor(&self, index: usize) -> Option<&Arc<dyn Tensor>> {
        self.inputs.get(index)
    }

    pub fn output_tensor(&self, index: usize) -> Option<&Arc<dyn Tensor>> {
        self.outputs.get(index)
    }

    /// Configure every job in dependency order, propagating resolved
    /// shapes from producers to consumers without running any kernel.
    pub fn configure_all(&mut self) -> Result<()> {
        for i in 0..self.order.len() {
            let seq = self.order[i];
            let job = self.jobs[seq]
                .as_mut()
                .ok_or_else(|| Error::msg("job missing from plan"))?;
            job.configure()?;
        }
        Ok(())
    }
}

/// An execution strategy over a prepared plan. Strategies must be
/// interchangeable: same inputs, same outputs, different walk.
pub trait Executor: Send {
    fn name(&self) -> &'static str;
    fn run(&mut self, plan: &mut ExecutablePlan, observee: &mut ExecutionObservee) -> Result<()>;
}

/// Selector for the built-in executors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Sequences run strictly in lowered order on the calling thread.
    Linear,
    /// Independent sequences run concurrently; synchronization happens
    /// only on producer→consumer edges.
    Parallel,
}

impl ExecutorKind {
    pub fn build(self) -> Box<dyn Executor> {
        match self {
            ExecutorKind::Linear => Box::new(linear::LinearExecutor),
            ExecutorKind::Parallel => Box::new(parallel::ParallelExecutor),
        }
    }
}
