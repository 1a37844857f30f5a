use vole_core::{Error, Result};

use super::observer::ExecutionObservee;
use super::{ExecutablePlan, Executor};

/// Runs every op sequence in lowered order on the calling thread.
pub struct LinearExecutor;

impl Executor for LinearExecutor {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn run(&mut self, plan: &mut ExecutablePlan, observee: &mut ExecutionObservee) -> Result<()> {
        observee.notify_subgraph_begin();

        let order = plan.order.clone();
        for seq in order {
            let job = match plan.jobs[seq].as_mut() {
                Some(job) => job,
                None => {
                    observee.notify_subgraph_end();
                    return Err(Error::msg("job missing from plan"));
                }
            };
            let (seq_idx, backend) = (job.seq, job.backend.clone());

            observee.notify_job_begin(seq_idx, &backend);
            let result = job.run();
            observee.notify_job_end(seq_idx, &backend);

            if let Err(e) = result {
                observee.notify_subgraph_end();
                return Err(e);
            }
        }

        observee.notify_subgraph_end();
        Ok(())
    }
}
