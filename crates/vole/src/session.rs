use std::collections::HashMap;
use std::sync::Arc;

use vole_core::{Backend, Error, Graph, Layout, OperationIndex, Result, Shape};

use crate::compile;
use crate::compile::scheduler::{CostPolicy, PreferPredecessor};
use crate::exec::observer::{ExecutionObservee, ExecutionObserver};
use crate::exec::{ExecutablePlan, Executor, ExecutorKind};

// Session — the embedding-facing lifecycle around one prepared plan
//
// prepare() is single-threaded and must complete before the first run; a
// prepared session then serializes execution requests through &mut self.
// Each run steps Idle → Configuring → Running → Idle: input shapes are
// declared and written while Configuring, kernels re-resolve their output
// extents there, and only then does the chosen executor walk the plan.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Configuring,
    Running,
}

pub struct Session {
    plan: ExecutablePlan,
    observee: ExecutionObservee,
    executor: Box<dyn Executor>,
    phase: Phase,
    needs_configure: bool,
}

impl Session {
    /// Prepare `graph` over the given backend allow-list (order is
    /// scheduling priority), with the default cost policy.
    pub fn prepare(graph: Graph, backends: &[Arc<dyn Backend>]) -> Result<Session> {
        Session::prepare_with_policy(graph, backends, &PreferPredecessor, &HashMap::new())
    }

    /// Prepare with an explicit cost policy and per-operation backend
    /// hints.
    pub fn prepare_with_policy(
        graph: Graph,
        backends: &[Arc<dyn Backend>],
        policy: &dyn CostPolicy,
        hints: &HashMap<OperationIndex, String>,
    ) -> Result<Session> {
        let plan = compile::prepare(graph, backends, policy, hints)?;
        Ok(Session {
            plan,
            observee: ExecutionObservee::new(),
            executor: ExecutorKind::Linear.build(),
            phase: Phase::Idle,
            needs_configure: true,
        })
    }

    /// Swap the execution strategy. Outputs are identical either way.
    pub fn set_executor(&mut self, kind: ExecutorKind) {
        self.executor = kind.build();
    }

    /// Register an observer for subgraph/job lifecycle events.
    /// Registration is append-only; notification follows this order.
    pub fn add_observer(&mut self, observer: Box<dyn ExecutionObserver>) {
        self.observee.add(observer);
    }

    pub fn input_count(&self) -> usize {
        self.plan.input_count()
    }

    pub fn output_count(&self) -> usize {
        self.plan.output_count()
    }

    /// Declare the canonical shape of input `index` for the next run.
    /// Required before running when the input has a dynamic dimension;
    /// also the way to re-resolve it between runs.
    pub fn set_input_shape(&mut self, index: usize, shape: &Shape) -> Result<()> {
        let tensor = self
            .plan
            .input_tensor(index)
            .ok_or_else(|| Error::msg(format!("no graph input at position {index}")))?;
        let physical = Layout::permute_shape(shape, Layout::NHWC, tensor.layout());
        tensor.set_shape(&physical)?;
        self.needs_configure = true;
        Ok(())
    }

    /// Canonical shape of output `index`, as resolved by the last run.
    pub fn output_shape(&self, index: usize) -> Option<Shape> {
        let tensor = self.plan.output_tensor(index)?;
        Some(Layout::permute_shape(
            &tensor.shape(),
            tensor.layout(),
            Layout::NHWC,
        ))
    }

    /// Execute one request: bind `inputs` positionally, re-configure if
    /// any shape changed since the last run, run every op sequence, and
    /// return the output buffers in canonical element order.
    ///
    /// A failed run leaves the prepared plan valid; correcting the inputs
    /// and retrying on the same session is always safe.
    pub fn run(&mut self, inputs: &[&[f32]]) -> Result<Vec<Vec<f32>>> {
        if self.phase != Phase::Idle {
            return Err(Error::msg("session is already executing"));
        }
        self.phase = Phase::Configuring;
        let result = self.execute(inputs);
        self.phase = Phase::Idle;
        result
    }

    fn execute(&mut self, inputs: &[&[f32]]) -> Result<Vec<Vec<f32>>> {
        if inputs.len() != self.plan.input_count() {
            return Err(Error::msg(format!(
                "expected {} input buffer(s), got {}",
                self.plan.input_count(),
                inputs.len()
            )));
        }
        for (index, data) in inputs.iter().enumerate() {
            let tensor = self
                .plan
                .input_tensor(index)
                .ok_or_else(|| Error::msg(format!("no graph input at position {index}")))?;
            tensor.write(data)?;
        }

        if self.needs_configure {
            self.plan.configure_all()?;
            self.needs_configure = false;
        }

        self.phase = Phase::Running;
        self.executor.run(&mut self.plan, &mut self.observee)?;

        self.plan
            .outputs
            .iter()
            .map(|tensor| tensor.read())
            .collect()
    }
}
