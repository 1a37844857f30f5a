use std::collections::VecDeque;
use std::sync::mpsc;
use std::thread;

use vole_core::{Error, Result};

use super::observer::ExecutionObservee;
use super::{ExecutablePlan, Executor, Job};

// Parallel executor — dataflow dispatch over the sequence dependency DAG
//
// The coordinator thread owns the observer fan-out and the scheduling
// state; worker threads own one checked-out Job at a time. A sequence is
// dispatched only when all of its producer sequences have completed, so
// synchronization points are exactly the cross-sequence data edges. On a
// failure the coordinator stops dispatching, drains the jobs already in
// flight, and returns the first error; every job is checked back into the
// plan either way, leaving the session reusable.

pub struct ParallelExecutor;

impl Executor for ParallelExecutor {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn run(&mut self, plan: &mut ExecutablePlan, observee: &mut ExecutionObservee) -> Result<()> {
        let order = plan.order.clone();
        let n = plan.jobs.len();

        let mut pending = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &seq in &order {
            pending[seq] = plan.deps[seq].len();
            for &dep in &plan.deps[seq] {
                dependents[dep].push(seq);
            }
        }

        // Ready queue seeded with dependency-free sequences, in lowered
        // order for a deterministic dispatch sequence.
        let mut ready: VecDeque<usize> = order
            .iter()
            .copied()
            .filter(|&seq| pending[seq] == 0)
            .collect();

        observee.notify_subgraph_begin();

        let (done_tx, done_rx) = mpsc::channel::<(usize, Job, Result<()>)>();
        let mut first_err: Option<Error> = None;
        let mut in_flight = 0usize;

        thread::scope(|scope| {
            loop {
                // Dispatch everything ready, unless a failure already
                // stopped the run.
                while first_err.is_none() {
                    let Some(seq) = ready.pop_front() else { break };
                    let Some(mut job) = plan.jobs[seq].take() else {
                        first_err = Some(Error::msg("job missing from plan"));
                        break;
                    };
                    observee.notify_job_begin(job.seq, &job.backend);
                    let tx = done_tx.clone();
                    scope.spawn(move || {
                        let result = job.run();
                        let _ = tx.send((seq, job, result));
                    });
                    in_flight += 1;
                }

                if in_flight == 0 {
                    break;
                }

                match done_rx.recv() {
                    Ok((seq, job, result)) => {
                        in_flight -= 1;
                        observee.notify_job_end(job.seq, &job.backend);
                        plan.jobs[seq] = Some(job);
                        match result {
                            Ok(()) => {
                                if first_err.is_none() {
                                    for &d in &dependents[seq] {
                                        pending[d] -= 1;
                                        if pending[d] == 0 {
                                            ready.push_back(d);
                                        }
                                    }
                                }
                            }
                            Err(e) => {
                                if first_err.is_none() {
                                    first_err = Some(e);
                                }
                            }
                        }
                    }
                    Err(_) => {
                        if first_err.is_none() {
                            first_err = Some(Error::msg("worker thread disconnected"));
                        }
                        break;
                    }
                }
            }
        });

        observee.notify_subgraph_end();

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
