use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::error::TaskError;
use crate::job::{execute_caught, Job};

/// Job that runs a list of sub-jobs one after another.
///
/// The first failing sub-job stops the run; the remaining ones never start.
/// A panicking sub-job counts as a failure.
pub struct SequentialRunner {
    name: String,
    jobs: Vec<Arc<dyn Job>>,
}

impl Default for SequentialRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SequentialRunner {
    pub fn new() -> Self {
        Self::named("SequentialRunner")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
        }
    }

    /// Append a sub-job.
    pub fn then(mut self, job: impl Job) -> Self {
        self.jobs.push(Arc::new(job));
        self
    }

    pub fn then_arc(mut self, job: Arc<dyn Job>) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl Job for SequentialRunner {
    async fn execute(&self) -> Result<(), TaskError> {
        for (i, job) in self.jobs.iter().enumerate() {
            let step = job.name();
            debug!(runner = %self.name, step = %step, index = i, "running sub-task");

            match execute_caught(job.as_ref()).await {
                Ok(()) => {}
                Err(TaskError::Panicked(msg)) => {
                    error!(runner = %self.name, step = %step, panic = %msg, "sub-task panicked");
                    return Err(TaskError::Panicked(format!("sub-task '{step}': {msg}")));
                }
                Err(e) => {
                    warn!(runner = %self.name, step = %step, error = %e, "sub-task failed, skipping the rest");
                    return Err(TaskError::SubTask {
                        name: step,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::job::FnJob;
    use crate::task::{Task, TaskState};

    type Trace = Arc<Mutex<Vec<String>>>;

    fn step(name: &'static str, trace: &Trace, ok: bool) -> impl Job {
        let trace = trace.clone();
        FnJob::new(name, move || {
            let trace = trace.clone();
            async move {
                trace.lock().unwrap().push(name.to_string());
                if ok {
                    Ok(())
                } else {
                    Err(TaskError::failed(format!("{name} broke")))
                }
            }
        })
    }

    #[tokio::test]
    async fn runs_steps_in_order() {
        let trace = Trace::default();
        let runner = SequentialRunner::named("intro")
            .then(step("fade", &trace, true))
            .then(step("dialog", &trace, true))
            .then(step("reward", &trace, true));
        assert_eq!(runner.len(), 3);

        runner.execute().await.unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["fade", "dialog", "reward"]);
    }

    #[tokio::test]
    async fn first_failure_stops_the_run() {
        let trace = Trace::default();
        let runner = SequentialRunner::new()
            .then(step("one", &trace, true))
            .then(step("two", &trace, false))
            .then(step("three", &trace, true));

        let err = runner.execute().await.unwrap_err();
        match err {
            TaskError::SubTask { name, source } => {
                assert_eq!(name, "two");
                assert_eq!(source.to_string(), "two broke");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*trace.lock().unwrap(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn panicking_step_is_caught() {
        let trace = Trace::default();
        let runner = SequentialRunner::new()
            .then(FnJob::new("explode", || async {
                if true {
                    panic!("corrupt save");
                }
                Ok::<(), TaskError>(())
            }))
            .then(step("after", &trace, true));

        let err = runner.execute().await.unwrap_err();
        assert!(matches!(err, TaskError::Panicked(ref msg) if msg.contains("explode") && msg.contains("corrupt save")));
        assert!(trace.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_runner_succeeds() {
        let runner = SequentialRunner::default();
        assert!(runner.is_empty());
        assert!(runner.execute().await.is_ok());
    }

    #[tokio::test]
    async fn wrapped_in_task_reaches_terminal_state() {
        let trace = Trace::default();
        let task = Task::new(
            SequentialRunner::named("combo")
                .then(step("a", &trace, true))
                .then(step("b", &trace, false)),
        );
        assert_eq!(task.name(), "combo");
        task.run();
        let state = timeout(Duration::from_secs(2), task.finished()).await.unwrap();
        assert_eq!(state, TaskState::Completed { success: false });
    }
}
