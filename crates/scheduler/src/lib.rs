//! Context-scoped, priority-ordered task scheduling on tokio.
//!
//! Tasks are queued per named context and ranked by that context's priority
//! vocabulary. The [`SchedulerManager`] drains only the current context, one
//! task at a time.

pub mod contexts;
pub mod error;
pub mod events;
pub mod job;
pub mod manager;
pub mod sequential;
mod sync;
pub mod task;
pub mod task_queue;

pub use error::{SchedulerError, TaskError};
pub use events::SchedulerEvent;
pub use job::{FnJob, Job};
pub use manager::SchedulerManager;
pub use sequential::SequentialRunner;
pub use task::{Task, TaskId, TaskState};
pub use task_queue::TaskQueue;

pub use ctxq_core::{PriorityMap, PriorityOrder, Rank};
