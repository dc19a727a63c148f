//! One context's execution surface.
//!
//! A [`TaskQueue`] keeps pending tasks in a [`StablePriorityQueue`] ranked by
//! the context's [`PriorityMap`] and drains them one at a time. Starting
//! execution runs the first task synchronously and spawns a drain loop that
//! awaits each task's completion signal before running the next one.
//!
//! Every start bumps an epoch counter. A drain loop that wakes up after a
//! stop (or after a stop followed by a new start) sees a stale epoch and
//! exits without touching the queue.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use ctxq_core::{PriorityMap, PriorityOrder, Rank, StablePriorityQueue};

use crate::sync::lock;
use crate::task::{Task, TaskId, TaskState};

struct QueueState {
    pending: StablePriorityQueue<TaskId, Task>,
    active: Option<Task>,
    executing: bool,
    epoch: u64,
}

impl QueueState {
    /// Pop the next task and run it. Clears the executing flag when the
    /// queue has run dry.
    fn run_next(&mut self, context: &str) -> Option<Task> {
        match self.pending.dequeue() {
            Some((_, task)) => {
                info!(context, task = %task.name(), remaining = self.pending.len(), "executing task");
                self.active = Some(task.clone());
                task.run();
                Some(task)
            }
            None => {
                debug!(context, "no more tasks to execute");
                self.executing = false;
                None
            }
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.executing && self.epoch == epoch
    }
}

/// Priority-ordered queue of tasks with at most one active task.
pub struct TaskQueue<P> {
    name: Arc<str>,
    priorities: PriorityMap<P>,
    state: Arc<Mutex<QueueState>>,
    watchdog: Option<Duration>,
}

impl<P> TaskQueue<P>
where
    P: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, order: &PriorityOrder<P>) -> Self {
        Self {
            name: Arc::from(name.into()),
            priorities: PriorityMap::new(order),
            state: Arc::new(Mutex::new(QueueState {
                pending: StablePriorityQueue::new(),
                active: None,
                executing: false,
                epoch: 0,
            })),
            watchdog: None,
        }
    }

    /// Cancel an active task that has not finished within `limit` and move on.
    pub fn with_watchdog(mut self, limit: Duration) -> Self {
        self.watchdog = Some(limit);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priorities(&self) -> &PriorityMap<P> {
        &self.priorities
    }

    pub fn watchdog(&self) -> Option<Duration> {
        self.watchdog
    }

    /// Queue `task` under `priority`, or re-rank it if it is already pending.
    pub fn enqueue(&self, task: &Task, priority: &P) {
        let rank = self.priorities.rank(priority);
        self.enqueue_ranked(task, rank, priority);
    }

    fn enqueue_ranked(&self, task: &Task, rank: Rank, priority: &P) {
        let mut state = lock(&self.state);
        if state.active.as_ref() == Some(task) {
            debug!(context = %self.name, task = %task.name(), ?priority, "task is already running, ignoring enqueue");
            return;
        }
        if state.pending.contains(&task.id()) {
            debug!(context = %self.name, task = %task.name(), ?priority, %rank, "task already queued, updating priority");
            state.pending.update_priority(&task.id(), rank);
        } else {
            debug!(context = %self.name, task = %task.name(), ?priority, %rank, "enqueuing task");
            state.pending.enqueue(task.id(), task.clone(), rank);
        }
    }
}

impl<P> TaskQueue<P> {
    /// Begin draining the queue. Returns `false` if execution is already in
    /// progress.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_execution(&self) -> bool {
        let mut state = lock(&self.state);
        if state.executing {
            debug!(context = %self.name, "execution is already in progress");
            return false;
        }

        state.executing = true;
        state.epoch += 1;
        let epoch = state.epoch;
        info!(context = %self.name, pending = state.pending.len(), "starting execution");

        if let Some(first) = state.run_next(&self.name) {
            tokio::spawn(drain(
                Arc::clone(&self.state),
                Arc::clone(&self.name),
                epoch,
                first,
                self.watchdog,
            ));
        }
        true
    }

    /// Stop draining. The active task is cancelled; pending tasks stay queued.
    /// Returns `false` if the queue was not executing.
    pub fn stop_execution(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.executing {
            warn!(context = %self.name, "no execution in progress to stop");
            return false;
        }

        state.executing = false;
        if let Some(active) = state.active.take() {
            if !active.is_finished() {
                active.cancel();
            }
        }
        info!(context = %self.name, pending = state.pending.len(), "stopped task execution");
        true
    }

    /// Stop execution and drop every pending task. Pending tasks are not
    /// cancelled since they never started.
    pub fn clear(&self) {
        if self.is_executing() {
            self.stop_execution();
        }

        let mut state = lock(&self.state);
        if !state.pending.is_empty() {
            info!(context = %self.name, count = state.pending.len(), "clearing queue");
            state.pending.clear();
        }
    }

    /// Pop the next pending task without running it.
    pub fn dequeue(&self) -> Option<Task> {
        let mut state = lock(&self.state);
        match state.pending.dequeue() {
            Some((_, task)) => Some(task),
            None => {
                debug!(context = %self.name, "queue is empty, nothing to dequeue");
                None
            }
        }
    }

    /// Drop one pending task. The active task cannot be removed this way.
    pub fn remove(&self, task: &Task) -> bool {
        lock(&self.state).pending.remove(&task.id()).is_some()
    }

    /// Number of pending tasks (the active task is not counted).
    pub fn len(&self) -> usize {
        lock(&self.state).pending.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).pending.is_empty()
    }

    pub fn is_executing(&self) -> bool {
        lock(&self.state).executing
    }

    pub fn active_task(&self) -> Option<Task> {
        lock(&self.state).active.clone()
    }

    /// Whether `task` is pending in this queue.
    pub fn contains(&self, task: &Task) -> bool {
        lock(&self.state).pending.contains(&task.id())
    }

    /// Whether `task` is the one currently running here.
    pub fn is_active(&self, task: &Task) -> bool {
        lock(&self.state).active.as_ref() == Some(task)
    }

    pub fn rank_of(&self, task: &Task) -> Option<Rank> {
        lock(&self.state).pending.rank(&task.id())
    }

    pub fn contains_name(&self, name: &str) -> bool {
        lock(&self.state).pending.iter().any(|(_, t)| t.name() == name)
    }

    /// Find a task by name, looking at pending tasks first and then at the
    /// active one.
    pub fn find_by_name(&self, name: &str) -> Option<Task> {
        let state = lock(&self.state);
        let found = state
            .pending
            .iter()
            .map(|(_, t)| t)
            .find(|t| t.name() == name)
            .or_else(|| state.active.as_ref().filter(|t| t.name() == name))
            .cloned();
        found
    }

    /// Snapshot of pending tasks in dequeue order.
    pub fn pending(&self) -> Vec<Task> {
        lock(&self.state)
            .pending
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }
}

impl<P> Debug for TaskQueue<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("TaskQueue")
            .field("name", &self.name)
            .field("pending", &state.pending.len())
            .field("active", &state.active)
            .field("executing", &state.executing)
            .finish()
    }
}

/// Await each active task's completion and run the next one until the queue
/// is empty or the run identified by `epoch` has been stopped.
async fn drain(
    state: Arc<Mutex<QueueState>>,
    context: Arc<str>,
    epoch: u64,
    first: Task,
    watchdog: Option<Duration>,
) {
    let mut current = first;
    loop {
        let outcome = match watchdog {
            Some(limit) => match tokio::time::timeout(limit, current.finished()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    if !lock(&state).is_current(epoch) {
                        return;
                    }
                    warn!(context = %context, task = %current.name(), ?limit, "task exceeded watchdog, cancelling");
                    current.cancel();
                    current.state()
                }
            },
            None => current.finished().await,
        };

        let mut guard = lock(&state);
        if !guard.is_current(epoch) {
            return;
        }

        match outcome {
            TaskState::Completed { success: true } => {
                info!(context = %context, task = %current.name(), "task completed")
            }
            TaskState::Completed { success: false } => {
                warn!(context = %context, task = %current.name(), "task completed with failure")
            }
            TaskState::Cancelled => {
                info!(context = %context, task = %current.name(), "task was cancelled")
            }
            other => error!(context = %context, task = %current.name(), state = %other, "task left in non-terminal state"),
        }

        if guard.active.as_ref() == Some(&current) {
            guard.active = None;
        }

        match guard.run_next(&context) {
            Some(next) => current = next,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::sync::Notify;
    use tokio::time::timeout;

    use super::*;
    use crate::error::TaskError;
    use crate::job::FnJob;

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Prio {
        High,
        Medium,
        Low,
    }

    fn queue() -> TaskQueue<Prio> {
        TaskQueue::new("test", &PriorityOrder::from([Prio::High, Prio::Medium, Prio::Low]))
    }

    type Trace = Arc<Mutex<Vec<String>>>;

    fn recording(name: &str, trace: &Trace) -> Task {
        let trace = trace.clone();
        let label = name.to_string();
        Task::named(
            name,
            FnJob::new(name, move || {
                let trace = trace.clone();
                let label = label.clone();
                async move {
                    trace.lock().unwrap().push(label);
                    Ok::<(), TaskError>(())
                }
            }),
        )
    }

    fn gated(name: &str, gate: &Arc<Notify>) -> Task {
        let gate = gate.clone();
        Task::named(
            name,
            FnJob::new(name, move || {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok::<(), TaskError>(())
                }
            }),
        )
    }

    async fn wait_idle(queue: &TaskQueue<Prio>) {
        timeout(TIMEOUT, async {
            while queue.is_executing() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("queue should drain");
    }

    #[tokio::test]
    async fn drains_in_rank_order() {
        let trace = Trace::default();
        let q = queue();
        q.enqueue(&recording("low", &trace), &Prio::Low);
        q.enqueue(&recording("high", &trace), &Prio::High);
        q.enqueue(&recording("medium", &trace), &Prio::Medium);

        assert!(q.start_execution());
        wait_idle(&q).await;

        assert_eq!(*trace.lock().unwrap(), vec!["high", "medium", "low"]);
        assert!(q.is_empty());
        assert!(q.active_task().is_none());
    }

    #[tokio::test]
    async fn equal_priorities_run_fifo() {
        let trace = Trace::default();
        let q = queue();
        for name in ["a", "b", "c", "d"] {
            q.enqueue(&recording(name, &trace), &Prio::Medium);
        }
        q.start_execution();
        wait_idle(&q).await;
        assert_eq!(*trace.lock().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn re_enqueue_updates_priority_without_duplicating() {
        let trace = Trace::default();
        let q = queue();
        let a = recording("a", &trace);
        let b = recording("b", &trace);
        q.enqueue(&a, &Prio::Low);
        q.enqueue(&b, &Prio::Medium);
        q.enqueue(&a, &Prio::High);

        assert_eq!(q.len(), 2);
        assert_eq!(q.rank_of(&a), Some(Rank::from_ordinal(0)));

        q.start_execution();
        wait_idle(&q).await;
        assert_eq!(*trace.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn priority_update_into_bucket_keeps_enqueue_order() {
        let trace = Trace::default();
        let q = queue();
        let first = recording("first", &trace);
        let second = recording("second", &trace);
        q.enqueue(&first, &Prio::Low);
        q.enqueue(&second, &Prio::Medium);
        q.enqueue(&first, &Prio::Medium);

        q.start_execution();
        wait_idle(&q).await;
        assert_eq!(*trace.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn start_twice_is_noop() {
        let gate = Arc::new(Notify::new());
        let q = queue();
        q.enqueue(&gated("blocker", &gate), &Prio::High);
        assert!(q.start_execution());
        assert!(!q.start_execution());
        assert!(q.is_executing());
        assert_eq!(q.active_task().map(|t| t.name()), Some("blocker".to_string()));
    }

    #[tokio::test]
    async fn start_on_empty_queue_goes_idle() {
        let q = queue();
        assert!(q.start_execution());
        assert!(!q.is_executing());
    }

    #[tokio::test]
    async fn stop_cancels_active_and_keeps_pending() {
        let gate = Arc::new(Notify::new());
        let trace = Trace::default();
        let q = queue();
        let blocker = gated("blocker", &gate);
        let waiting = recording("waiting", &trace);
        q.enqueue(&blocker, &Prio::High);
        q.enqueue(&waiting, &Prio::Low);

        q.start_execution();
        tokio::task::yield_now().await;
        assert!(blocker.is_running());

        assert!(q.stop_execution());
        assert!(!q.is_executing());
        assert!(blocker.is_cancelled());
        assert!(q.active_task().is_none());
        assert!(q.contains(&waiting));

        // the old drain loop must not pick up the pending task
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(trace.lock().unwrap().is_empty());
        assert!(waiting.is_idle());
    }

    #[tokio::test]
    async fn enqueue_of_running_task_is_ignored() {
        let gate = Arc::new(Notify::new());
        let q = queue();
        let task = gated("running", &gate);
        q.enqueue(&task, &Prio::Low);
        q.start_execution();
        tokio::task::yield_now().await;
        assert!(q.is_active(&task));

        q.enqueue(&task, &Prio::High);
        assert_eq!(q.len(), 0);
        assert!(!q.contains(&task));
        assert!(q.is_active(&task));

        gate.notify_one();
        wait_idle(&q).await;
        assert!(task.is_success());
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn stop_when_idle_is_rejected() {
        let q = queue();
        assert!(!q.stop_execution());
    }

    #[tokio::test]
    async fn restart_resumes_pending_tasks() {
        let gate = Arc::new(Notify::new());
        let trace = Trace::default();
        let q = queue();
        q.enqueue(&gated("blocker", &gate), &Prio::High);
        q.enqueue(&recording("later", &trace), &Prio::Low);

        q.start_execution();
        tokio::task::yield_now().await;
        q.stop_execution();

        assert!(q.start_execution());
        wait_idle(&q).await;
        assert_eq!(*trace.lock().unwrap(), vec!["later"]);
    }

    #[tokio::test]
    async fn clear_drops_pending_without_cancelling() {
        let gate = Arc::new(Notify::new());
        let q = queue();
        let active = gated("active", &gate);
        let pending = gated("pending", &gate);
        q.enqueue(&active, &Prio::High);
        q.enqueue(&pending, &Prio::Low);
        q.start_execution();

        q.clear();
        assert!(q.is_empty());
        assert!(!q.is_executing());
        assert!(active.is_cancelled());
        assert!(pending.is_idle(), "never-started tasks are dropped, not cancelled");
    }

    #[tokio::test]
    async fn failing_task_does_not_stall_the_queue() {
        let trace = Trace::default();
        let q = queue();
        q.enqueue(
            &Task::new(FnJob::new("broken", || async { Err::<(), _>(TaskError::failed("nope")) })),
            &Prio::High,
        );
        q.enqueue(
            &Task::new(FnJob::new("panicky", || async {
                if true {
                    panic!("bad state");
                }
                Ok::<(), TaskError>(())
            })),
            &Prio::High,
        );
        q.enqueue(&recording("after", &trace), &Prio::Low);

        q.start_execution();
        wait_idle(&q).await;
        assert_eq!(*trace.lock().unwrap(), vec!["after"]);
    }

    #[tokio::test]
    async fn externally_completed_task_advances_queue() {
        let gate = Arc::new(Notify::new());
        let trace = Trace::default();
        let q = queue();
        let panel = gated("panel", &gate);
        q.enqueue(&panel, &Prio::High);
        q.enqueue(&recording("next", &trace), &Prio::High);
        q.start_execution();
        tokio::task::yield_now().await;

        panel.complete();
        wait_idle(&q).await;
        assert_eq!(*trace.lock().unwrap(), vec!["next"]);
    }

    #[tokio::test]
    async fn watchdog_cancels_stuck_task() {
        let gate = Arc::new(Notify::new());
        let trace = Trace::default();
        let q = queue().with_watchdog(Duration::from_millis(20));
        let stuck = gated("stuck", &gate);
        q.enqueue(&stuck, &Prio::High);
        q.enqueue(&recording("next", &trace), &Prio::Low);

        q.start_execution();
        wait_idle(&q).await;
        assert!(stuck.is_cancelled());
        assert_eq!(*trace.lock().unwrap(), vec!["next"]);
    }

    #[tokio::test]
    async fn lookup_helpers() {
        let gate = Arc::new(Notify::new());
        let q = queue();
        let running = gated("running", &gate);
        let queued = gated("queued", &gate);
        q.enqueue(&running, &Prio::High);
        q.enqueue(&queued, &Prio::Low);
        q.start_execution();

        assert!(q.contains_name("queued"));
        assert!(!q.contains_name("running"), "active task is not pending");
        assert_eq!(q.find_by_name("running"), Some(running.clone()));
        assert_eq!(q.find_by_name("queued"), Some(queued.clone()));
        assert!(q.find_by_name("missing").is_none());
        assert!(q.is_active(&running));
        assert_eq!(q.pending(), vec![queued.clone()]);

        assert!(q.remove(&queued));
        assert!(!q.remove(&queued));
        assert!(!q.remove(&running), "active task cannot be removed");
    }

    #[tokio::test]
    async fn manual_dequeue() {
        let q = queue();
        assert!(q.dequeue().is_none());
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let task = Task::new(FnJob::new("count", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), TaskError>(())
            }
        }));
        q.enqueue(&task, &Prio::Medium);
        assert_eq!(q.dequeue(), Some(task.clone()));
        assert!(q.is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 0, "dequeue does not run the task");
    }

    #[tokio::test]
    async fn unknown_priority_runs_last() {
        let trace = Trace::default();
        let q: TaskQueue<&'static str> = TaskQueue::new("strings", &PriorityOrder::from(["ui", "net"]));
        q.enqueue(&recording("mystery", &trace), &"unlisted");
        q.enqueue(&recording("net", &trace), &"net");
        q.start_execution();
        timeout(TIMEOUT, async {
            while q.is_executing() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["net", "mystery"]);
    }
}
