use std::any::Any;

use thiserror::Error;

use ctxq_core::CoreError;

/// Rejected scheduler calls. Every rejection is logged before it is returned.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("context name must not be empty")]
    EmptyContextName,

    #[error("context '{0}' already exists")]
    DuplicateContext(String),

    #[error("context '{0}' does not exist")]
    UnknownContext(String),

    #[error("no current context set")]
    NoCurrentContext,

    #[error("context '{context}' is not the current context (current: {current})")]
    NotCurrentContext { context: String, current: String },

    #[error("task '{task}' already belongs to context '{context}'")]
    TaskInOtherContext { task: String, context: String },

    #[error("task '{task}' is not pending in context '{context}'")]
    TaskNotPending { task: String, context: String },

    #[error(transparent)]
    Config(#[from] CoreError),
}

/// Failure reported by a job.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("sub-task '{name}' failed: {source}")]
    SubTask {
        name: String,
        #[source]
        source: Box<TaskError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
