use serde::{Deserialize, Serialize};

/// Notifications broadcast by the [`SchedulerManager`](crate::SchedulerManager).
///
/// Delivery is fire-and-forget: nobody has to be listening, and a slow
/// subscriber only loses its own backlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// The current context designation moved from `old` to `new`.
    ContextChanged { old: Option<String>, new: String },
    /// The manager was activated (`true`) or deactivated (`false`).
    ActiveChanged { active: bool },
}

/// Capacity of the manager's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
