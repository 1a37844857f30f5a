use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use vole_core::lowered::OpSequenceIndex;

// Execution observer fan-out
//
// The observee holds the session's registered observers and relays every
// lifecycle event to each of them, synchronously and in registration
// order. Observers are instrumentation only: they receive indices and
// backend ids, never the plan itself.

/// A listener for execution lifecycle events. All methods default to
/// no-ops so an observer implements only what it cares about.
pub trait ExecutionObserver: Send {
    fn subgraph_begin(&mut self) {}
    fn subgraph_end(&mut self) {}
    fn job_begin(&mut self, _seq: OpSequenceIndex, _backend: &str) {}
    fn job_end(&mut self, _seq: OpSequenceIndex, _backend: &str) {}
}

/// Ordered, append-only collection of observers.
#[derive(Default)]
pub struct ExecutionObservee {
    observers: Vec<Box<dyn ExecutionObserver>>,
}

impl ExecutionObservee {
    pub fn new() -> Self {
        ExecutionObservee::default()
    }

    /// Register an observer. Registration order is notification order and
    /// observers cannot be removed for the session's lifetime.
    pub fn add(&mut self, observer: Box<dyn ExecutionObserver>) {
        self.observers.push(observer);
    }

    pub fn notify_subgraph_begin(&mut self) {
        for o in self.observers.iter_mut() {
            o.subgraph_begin();
        }
    }

    pub fn notify_subgraph_end(&mut self) {
        for o in self.observers.iter_mut() {
            o.subgraph_end();
        }
    }

    pub fn notify_job_begin(&mut self, seq: OpSequenceIndex, backend: &str) {
        for o in self.observers.iter_mut() {
            o.job_begin(seq, backend);
        }
    }

    pub fn notify_job_end(&mut self, seq: OpSequenceIndex, backend: &str) {
        for o in self.observers.iter_mut() {
            o.job_end(seq, backend);
        }
    }
}

/// Wall-clock timing of one job in the most recent run.
#[derive(Debug, Clone)]
pub struct JobTiming {
    pub seq: OpSequenceIndex,
    pub backend: String,
    pub elapsed: Duration,
}

/// Timings collected by a [`ProfileObserver`], refreshed each run.
#[derive(Debug, Clone, Default)]
pub struct ProfileReport {
    pub jobs: Vec<JobTiming>,
    pub total: Duration,
}

impl fmt::Display for ProfileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "execution profile ({} jobs):", self.jobs.len())?;
        for job in &self.jobs {
            writeln!(
                f,
                "  {:<8} {:<12} {:>10.3?}",
                job.seq.to_string(),
                job.backend,
                job.elapsed
            )?;
        }
        write!(f, "  total    {:>23.3?}", self.total)
    }
}

/// Observer recording per-job wall-clock durations. The report handle
/// returned by [`ProfileObserver::new`] stays readable after the observer
/// is handed to the session.
pub struct ProfileObserver {
    subgraph_started: Option<Instant>,
    job_started: HashMap<usize, Instant>,
    report: Arc<Mutex<ProfileReport>>,
}

impl ProfileObserver {
    pub fn new() -> (Self, Arc<Mutex<ProfileReport>>) {
        let report = Arc::new(Mutex::new(ProfileReport::default()));
        (
            ProfileObserver {
                subgraph_started: None,
                job_started: HashMap::new(),
                report: Arc::clone(&report),
            },
            report,
        )
    }
}

impl ExecutionObserver for ProfileObserver {
    fn subgraph_begin(&mut self) {
        self.subgraph_started = Some(Instant::now());
        self.job_started.clear();
        if let Ok(mut report) = self.report.lock() {
            *report = ProfileReport::default();
        }
    }

    fn subgraph_end(&mut self) {
        if let (Some(started), Ok(mut report)) = (self.subgraph_started.take(), self.report.lock())
        {
            report.total = started.elapsed();
        }
    }

    fn job_begin(&mut self, seq: OpSequenceIndex, _backend: &str) {
        self.job_started.insert(seq.0, Instant::now());
    }

    fn job_end(&mut self, seq: OpSequenceIndex, backend: &str) {
        if let (Some(started), Ok(mut report)) =
            (self.job_started.remove(&seq.0), self.report.lock())
        {
            report.jobs.push(JobTiming {
                seq,
                backend: backend.to_string(),
                elapsed: started.elapsed(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        tag: &'static str,
    }

    impl ExecutionObserver for Recorder {
        fn subgraph_begin(&mut self) {
            self.log.lock().unwrap().push(format!("{}:begin", self.tag));
        }
        fn job_begin(&mut self, seq: OpSequenceIndex, backend: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:job {seq} on {backend}", self.tag));
        }
    }

    #[test]
    fn test_notification_order_is_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut observee = ExecutionObservee::new();
        observee.add(Box::new(Recorder {
            log: Arc::clone(&log),
            tag: "first",
        }));
        observee.add(Box::new(Recorder {
            log: Arc::clone(&log),
            tag: "second",
        }));

        observee.notify_subgraph_begin();
        observee.notify_job_begin(OpSequenceIndex(0), "cpu");

        let entries = log.lock().unwrap().clone();
        assert_eq!(
            entries,
            vec![
                "first:begin",
                "second:begin",
                "first:job seq0 on cpu",
                "second:job seq0 on cpu",
            ]
        );
    }

    #[test]
    fn test_notifications_are_synchronous() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        struct Counter;
        impl ExecutionObserver for Counter {
            fn job_end(&mut self, _: OpSequenceIndex, _: &str) {
                CALLS.fetch_add(1, Ordering::SeqCst);
            }
        }

        let mut observee = ExecutionObservee::new();
        observee.add(Box::new(Counter));
        observee.notify_job_end(OpSequenceIndex(3), "cpu");
        // The call completed before notify returned.
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_profile_observer_collects_timings() {
        let (mut profiler, report) = ProfileObserver::new();
        profiler.subgraph_begin();
        profiler.job_begin(OpSequenceIndex(0), "cpu");
        profiler.job_end(OpSequenceIndex(0), "cpu");
        profiler.subgraph_end();

        let report = report.lock().unwrap();
        assert_eq!(report.jobs.len(), 1);
        assert_eq!(report.jobs[0].backend, "cpu");
        assert!(report.total >= report.jobs[0].elapsed);
        assert!(format!("{}", *report).contains("seq0"));
    }
}
