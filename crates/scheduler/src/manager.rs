//! Context routing and activation.
//!
//! [`SchedulerManager`] owns every context's [`TaskQueue`], the name of the
//! current context and a global active flag. Only the current context is
//! ever started by the manager: on activation, on becoming current while the
//! manager is active, and when a task is enqueued into it while active.
//! Switching away from a context does not stop it; a task already running
//! there finishes on its own.
//!
//! The manager has no internal locking. Mutating calls take `&mut self`;
//! share it across threads behind your own mutex.

use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use ctxq_core::{PriorityOrder, SchedulerConfig};

use crate::error::SchedulerError;
use crate::events::{SchedulerEvent, EVENT_CHANNEL_CAPACITY};
use crate::task::Task;
use crate::task_queue::TaskQueue;

/// Log a rejected call and hand the error back.
fn reject<T>(err: SchedulerError) -> Result<T, SchedulerError> {
    error!(error = %err, "scheduler call rejected");
    Err(err)
}

pub struct SchedulerManager<P> {
    contexts: IndexMap<String, TaskQueue<P>>,
    current: Option<String>,
    active: bool,
    events: broadcast::Sender<SchedulerEvent>,
}

impl<P> Default for SchedulerManager<P>
where
    P: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P> SchedulerManager<P>
where
    P: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            contexts: IndexMap::new(),
            current: None,
            active: false,
            events,
        }
    }

    /// Receive context-changed and active-changed notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SchedulerEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // ── Contexts ────────────────────────────────────────────────────

    pub fn create_context(
        &mut self,
        name: &str,
        order: &PriorityOrder<P>,
    ) -> Result<(), SchedulerError> {
        self.insert_context(name, TaskQueue::new(name, order))
    }

    /// Like [`create_context`](Self::create_context), with a watchdog that
    /// cancels tasks running longer than `watchdog`.
    pub fn create_context_with_watchdog(
        &mut self,
        name: &str,
        order: &PriorityOrder<P>,
        watchdog: Duration,
    ) -> Result<(), SchedulerError> {
        self.insert_context(name, TaskQueue::new(name, order).with_watchdog(watchdog))
    }

    fn insert_context(&mut self, name: &str, queue: TaskQueue<P>) -> Result<(), SchedulerError> {
        if name.is_empty() {
            return reject(SchedulerError::EmptyContextName);
        }
        if self.contexts.contains_key(name) {
            return reject(SchedulerError::DuplicateContext(name.to_string()));
        }
        self.contexts.insert(name.to_string(), queue);
        info!(context = %name, "created context");
        Ok(())
    }

    /// Stop, clear and drop a context. Returns `false` if it did not exist.
    /// If it was current, no context is current afterwards.
    pub fn remove_context(&mut self, name: &str) -> bool {
        let Some(queue) = self.contexts.shift_remove(name) else {
            return false;
        };
        queue.clear();

        if self.current.as_deref() == Some(name) {
            self.current = None;
        }
        info!(context = %name, "removed context");
        true
    }

    pub fn has_context(&self, name: &str) -> bool {
        !name.is_empty() && self.contexts.contains_key(name)
    }

    /// Context names in creation order.
    pub fn context_names(&self) -> Vec<String> {
        self.contexts.keys().cloned().collect()
    }

    /// Direct access to a context's queue.
    ///
    /// Calling [`TaskQueue::start_execution`] on a non-current queue runs it
    /// alongside the current one; the manager never does this itself.
    pub fn queue(&self, name: &str) -> Option<&TaskQueue<P>> {
        self.contexts.get(name)
    }

    fn lookup(&self, name: &str) -> Result<&TaskQueue<P>, SchedulerError> {
        if name.is_empty() {
            return reject(SchedulerError::EmptyContextName);
        }
        match self.contexts.get(name) {
            Some(queue) => Ok(queue),
            None => reject(SchedulerError::UnknownContext(name.to_string())),
        }
    }

    fn current_queue(&self) -> Option<&TaskQueue<P>> {
        self.current.as_deref().and_then(|name| self.contexts.get(name))
    }

    fn current_name(&self) -> Result<&str, SchedulerError> {
        match self.current.as_deref() {
            Some(name) => Ok(name),
            None => reject(SchedulerError::NoCurrentContext),
        }
    }

    // ── Current context ─────────────────────────────────────────────

    pub fn current_context(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Make `name` the current context. If the manager is active and the
    /// context is idle it starts draining right away. The previous context
    /// keeps whatever it was doing.
    pub fn set_current_context(&mut self, name: &str) -> Result<(), SchedulerError> {
        let queue = self.lookup(name)?;
        if self.active && !queue.is_executing() {
            queue.start_execution();
        }

        let old = self.current.replace(name.to_string());
        info!(
            old = old.as_deref().unwrap_or(""),
            new = %name,
            "context changed"
        );
        self.emit(SchedulerEvent::ContextChanged {
            old,
            new: name.to_string(),
        });
        Ok(())
    }

    // ── Enqueue ─────────────────────────────────────────────────────

    /// Queue `task` in context `name`. If that context is current, the
    /// manager is active and the queue is idle, draining starts immediately.
    pub fn enqueue_task(
        &mut self,
        name: &str,
        task: &Task,
        priority: &P,
    ) -> Result<(), SchedulerError> {
        let queue = self.lookup(name)?;

        if let Some((other, _)) = self
            .contexts
            .iter()
            .find(|(other, q)| other.as_str() != name && (q.contains(task) || q.is_active(task)))
        {
            return reject(SchedulerError::TaskInOtherContext {
                task: task.name(),
                context: other.clone(),
            });
        }

        queue.enqueue(task, priority);
        debug!(context = %name, task = %task.name(), ?priority, "enqueued task");

        if self.current.as_deref() == Some(name) && self.active && !queue.is_executing() {
            queue.start_execution();
            debug!(context = %name, "started execution in current context");
        }
        Ok(())
    }

    /// Queue `task` in the current context.
    pub fn enqueue_current(&mut self, task: &Task, priority: &P) -> Result<(), SchedulerError> {
        let name = self.current_name()?.to_string();
        self.enqueue_task(&name, task, priority)
    }

    // ── Activation ──────────────────────────────────────────────────

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Activate the manager, starting the current context if it has pending
    /// tasks. Returns `false` if it was already active.
    pub fn activate(&mut self) -> bool {
        if self.active {
            debug!("manager is already active");
            return false;
        }
        self.active = true;
        self.emit(SchedulerEvent::ActiveChanged { active: true });
        info!("manager activated");

        if let Some(queue) = self.current_queue() {
            if !queue.is_empty() && !queue.is_executing() {
                queue.start_execution();
            }
        }
        true
    }

    /// Deactivate the manager, stopping the current context (its active task
    /// is cancelled). Other contexts are left alone. Returns `false` if it
    /// was already inactive.
    pub fn deactivate(&mut self) -> bool {
        if !self.active {
            debug!("manager is already inactive");
            return false;
        }
        self.active = false;
        self.emit(SchedulerEvent::ActiveChanged { active: false });
        info!("manager deactivated");

        if let Some(queue) = self.current_queue() {
            if queue.is_executing() {
                queue.stop_execution();
                info!(context = %queue.name(), "stopped current context after deactivation");
            }
        }
        true
    }

    // ── Execution control ───────────────────────────────────────────

    /// Start draining `name`. Only the current context can be started here.
    pub fn start_context_execution(&self, name: &str) -> Result<(), SchedulerError> {
        let queue = self.lookup(name)?;
        match self.current.as_deref() {
            Some(current) if current == name => {
                queue.start_execution();
                Ok(())
            }
            current => reject(SchedulerError::NotCurrentContext {
                context: name.to_string(),
                current: current.unwrap_or("").to_string(),
            }),
        }
    }

    /// Stop draining `name`, cancelling its active task.
    pub fn stop_context_execution(&self, name: &str) -> Result<(), SchedulerError> {
        self.lookup(name)?.stop_execution();
        Ok(())
    }

    /// Stop `name` and drop all of its pending tasks.
    pub fn clear_context(&self, name: &str) -> Result<(), SchedulerError> {
        self.lookup(name)?.clear();
        info!(context = %name, "cleared all tasks from context");
        Ok(())
    }

    pub fn clear_current_context(&self) -> Result<(), SchedulerError> {
        let name = self.current_name()?;
        self.clear_context(name)
    }

    pub fn clear_all_contexts(&self) {
        for queue in self.contexts.values() {
            queue.clear();
        }
        info!("cleared all tasks from all contexts");
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Pending tasks in `name`; 0 for an unknown context.
    pub fn task_count(&self, name: &str) -> usize {
        self.contexts.get(name).map_or(0, TaskQueue::len)
    }

    pub fn current_task_count(&self) -> usize {
        self.current_queue().map_or(0, TaskQueue::len)
    }

    pub fn is_context_executing(&self, name: &str) -> bool {
        self.contexts.get(name).is_some_and(TaskQueue::is_executing)
    }

    /// Whether the current context is executing.
    pub fn is_executing(&self) -> bool {
        self.current_queue().is_some_and(TaskQueue::is_executing)
    }

    pub fn active_task(&self, name: &str) -> Option<Task> {
        self.contexts.get(name).and_then(TaskQueue::active_task)
    }

    /// Whether `task` is pending in `name`.
    pub fn is_task_in_context(&self, name: &str, task: &Task) -> bool {
        self.contexts.get(name).is_some_and(|q| q.contains(task))
    }

    /// Find a pending or active task in `name` by its name.
    pub fn find_task(&self, name: &str, task_name: &str) -> Option<Task> {
        if task_name.is_empty() {
            return None;
        }
        self.contexts.get(name).and_then(|q| q.find_by_name(task_name))
    }

    // ── Removal ─────────────────────────────────────────────────────

    /// Drop a pending task from `name`. Running tasks cannot be removed;
    /// stop the context instead.
    pub fn remove_task(&self, name: &str, task: &Task) -> Result<(), SchedulerError> {
        let queue = self.lookup(name)?;
        if queue.remove(task) {
            debug!(context = %name, task = %task.name(), "removed pending task");
            Ok(())
        } else {
            if queue.is_active(task) {
                warn!(context = %name, task = %task.name(), "cannot remove the active task");
            }
            reject(SchedulerError::TaskNotPending {
                task: task.name(),
                context: name.to_string(),
            })
        }
    }

    pub fn remove_current_task(&self, task: &Task) -> Result<(), SchedulerError> {
        let name = self.current_name()?;
        self.remove_task(name, task)
    }
}

impl SchedulerManager<String> {
    /// Build a manager from config: create every context in order, then set
    /// the current context and activate as configured.
    pub fn from_config(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;

        let mut manager = Self::new();
        for ctx in &config.contexts {
            let order = ctx.priority_order();
            match ctx.watchdog() {
                Some(limit) => manager.create_context_with_watchdog(&ctx.name, &order, limit)?,
                None => manager.create_context(&ctx.name, &order)?,
            }
        }
        if let Some(current) = &config.current {
            manager.set_current_context(current)?;
        }
        if config.activate {
            manager.activate();
        }
        Ok(manager)
    }
}

impl<P> Drop for SchedulerManager<P> {
    fn drop(&mut self) {
        for queue in self.contexts.values() {
            queue.clear();
        }
    }
}

impl<P> Debug for SchedulerManager<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerManager")
            .field("contexts", &self.contexts.keys().collect::<Vec<_>>())
            .field("current", &self.current)
            .field("active", &self.active)
            .finish()
    }
}
