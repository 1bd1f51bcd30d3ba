//! Repeating tasks and the loops that drive them.
//!
//! A [`RepeatTask`] is anything that can run a unit of work and then say
//! how long to sleep before the next one. [`FixedIntervalTask`] always
//! answers the same; [`AdaptiveIntervalTask`] consults the staleness
//! counters and stretches the cadence when every route has gone quiet.
//! [`run_tasks`] gives each task its own supervising loop and honors a
//! shutdown signal between ticks: an in-flight run finishes, the next
//! one never starts.

use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::history::FetchHistory;

/// A unit of work that runs repeatedly with a task-chosen pause between
/// runs.
#[async_trait]
pub trait RepeatTask: Send {
    fn name(&self) -> &str;

    /// Runs the task once. Errors are reported by the supervisor and do
    /// not stop the loop.
    async fn run(&mut self) -> Result<()>;

    /// How long to sleep before the next run. Evaluated after every run.
    fn interval(&mut self) -> Duration;
}

/// Runs its job at an unchanging interval.
pub struct FixedIntervalTask<F> {
    name: String,
    every: Duration,
    job: F,
}

impl<F> FixedIntervalTask<F> {
    pub fn new(name: &str, every: Duration, job: F) -> Self {
        FixedIntervalTask {
            name: name.to_string(),
            every,
            job,
        }
    }
}

#[async_trait]
impl<F, Fut> RepeatTask for FixedIntervalTask<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> Result<()> {
        (self.job)().await
    }

    fn interval(&mut self) -> Duration {
        self.every
    }
}

/// Polling cadence of an [`AdaptiveIntervalTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Running,
    Extended,
}

/// Runs its job at a normal interval while routes are producing updates,
/// and at an extended one once every tracked route has been quiet for
/// `dormant_after` counted consecutive polls.
pub struct AdaptiveIntervalTask<F> {
    name: String,
    job: F,
    history: Arc<Mutex<FetchHistory>>,
    normal: Duration,
    extended: Duration,
    dormant_after: u32,
    cadence: Cadence,
}

impl<F> AdaptiveIntervalTask<F> {
    pub fn new(
        name: &str,
        job: F,
        history: Arc<Mutex<FetchHistory>>,
        normal: Duration,
        extended: Duration,
        dormant_after: u32,
    ) -> Self {
        AdaptiveIntervalTask {
            name: name.to_string(),
            job,
            history,
            normal,
            extended,
            dormant_after,
            cadence: Cadence::Running,
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }
}

#[async_trait]
impl<F, Fut> RepeatTask for AdaptiveIntervalTask<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> Result<()> {
        (self.job)().await
    }

    fn interval(&mut self) -> Duration {
        let mut history = self.history.lock().expect("fetch history lock poisoned");

        // Dormancy over zero streams is vacuously true; a task that has
        // never seen a route keeps its normal cadence.
        if history.stream_count() > 0 && history.all_dormant(self.dormant_after) {
            history.reset_counters();
            if self.cadence != Cadence::Extended {
                info!(task = %self.name, "all routes dormant, extending poll interval");
            }
            self.cadence = Cadence::Extended;
            self.extended
        } else {
            if self.cadence == Cadence::Extended {
                info!(task = %self.name, "routes active again, resuming normal interval");
            }
            self.cadence = Cadence::Running;
            self.normal
        }
    }
}

/// Drives each task in its own loop until `shutdown` turns true. Returns
/// once every loop has stopped.
pub async fn run_tasks(tasks: Vec<Box<dyn RepeatTask>>, shutdown: watch::Receiver<bool>) {
    let mut loops = JoinSet::new();
    for task in tasks {
        let shutdown = shutdown.clone();
        loops.spawn(supervise(task, shutdown));
    }
    while let Some(joined) = loops.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "task loop panicked");
        }
    }
}

async fn supervise(mut task: Box<dyn RepeatTask>, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Err(e) = task.run().await {
            error!(task = task.name(), error = %e, "task run failed");
        }

        let delay = task.interval();
        debug!(task = task.name(), delay_secs = delay.as_secs(), "next run");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
    }
    debug!(task = task.name(), "task loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_job() -> impl FnMut() -> std::future::Ready<Result<()>> {
        || std::future::ready(Ok(()))
    }

    fn adaptive(
        history: &Arc<Mutex<FetchHistory>>,
        dormant_after: u32,
    ) -> AdaptiveIntervalTask<impl FnMut() -> std::future::Ready<Result<()>>> {
        AdaptiveIntervalTask::new(
            "capture",
            noop_job(),
            Arc::clone(history),
            Duration::from_secs(30),
            Duration::from_secs(600),
            dormant_after,
        )
    }

    #[test]
    fn test_normal_cadence_while_routes_active() {
        let history = Arc::new(Mutex::new(FetchHistory::new()));
        history.lock().unwrap().record_outcome("801", true);

        let mut task = adaptive(&history, 1);
        assert_eq!(task.interval(), Duration::from_secs(30));
        assert_eq!(task.cadence(), Cadence::Running);
    }

    #[test]
    fn test_no_streams_means_normal_cadence() {
        let history = Arc::new(Mutex::new(FetchHistory::new()));
        let mut task = adaptive(&history, 1);
        // Vacuously dormant, but with zero streams we stay at normal.
        assert_eq!(task.interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_dormant_routes_extend_interval_and_reset_counters() {
        let history = Arc::new(Mutex::new(FetchHistory::new()));
        {
            let mut h = history.lock().unwrap();
            for _ in 0..4 {
                h.record_outcome("801", false);
            }
            assert!(h.all_dormant(3));
        }

        let mut task = adaptive(&history, 3);
        assert_eq!(task.interval(), Duration::from_secs(600));
        assert_eq!(task.cadence(), Cadence::Extended);

        // Counters were reset, so the next decision (with no further
        // empty polls counted) returns to normal on the very next tick.
        assert_eq!(task.interval(), Duration::from_secs(30));
        assert_eq!(task.cadence(), Cadence::Running);
    }

    #[test]
    fn test_wake_up_on_activity() {
        let history = Arc::new(Mutex::new(FetchHistory::new()));
        {
            let mut h = history.lock().unwrap();
            for _ in 0..4 {
                h.record_outcome("801", false);
            }
        }

        let mut task = adaptive(&history, 3);
        assert_eq!(task.interval(), Duration::from_secs(600));

        history.lock().unwrap().record_outcome("801", true);
        assert_eq!(task.interval(), Duration::from_secs(30));
        assert_eq!(task.cadence(), Cadence::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_runs_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let task = FixedIntervalTask::new("count", Duration::from_secs(1), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let (tx, rx) = watch::channel(false);
        let runner = tokio::spawn(run_tasks(vec![Box::new(task)], rx));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(true).unwrap();
        runner.await.unwrap();

        let runs = count.load(Ordering::SeqCst);
        assert!((3..=5).contains(&runs), "expected ~4 runs, got {runs}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_prevents_next_tick() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let task = FixedIntervalTask::new("count", Duration::from_secs(60), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let (tx, rx) = watch::channel(false);
        let runner = tokio::spawn(run_tasks(vec![Box::new(task)], rx));

        // First run happens immediately; raise shutdown mid-sleep.
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send(true).unwrap();
        runner.await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
