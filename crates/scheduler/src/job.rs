//! The unit of work a [`Task`](crate::Task) executes.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::{panic_message, TaskError};

/// Asynchronous work scheduled through a task queue.
///
/// Implementors only describe *what* to do; lifecycle bookkeeping (state,
/// completion signalling, cancellation) is handled by the owning
/// [`Task`](crate::Task). Returning `Ok(())` completes the task successfully,
/// returning an error or panicking completes it as failed.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn execute(&self) -> Result<(), TaskError>;

    /// Display name used for logging and name lookups. Defaults to the
    /// implementing type's name without its module path.
    fn name(&self) -> String {
        short_type_name(std::any::type_name::<Self>()).to_string()
    }
}

/// Job built from an async closure.
///
/// ```ignore
/// let job = FnJob::new("warm-cache", || async {
///     cache.warm().await?;
///     Ok(())
/// });
/// ```
pub struct FnJob<F> {
    name: String,
    f: F,
}

impl<F> FnJob<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

#[async_trait]
impl<F, Fut> Job for FnJob<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn execute(&self) -> Result<(), TaskError> {
        (self.f)().await
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Run a job, converting a panic inside it into [`TaskError::Panicked`].
pub(crate) async fn execute_caught(job: &dyn Job) -> Result<(), TaskError> {
    match AssertUnwindSafe(job.execute()).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked(panic_message(&*payload))),
    }
}

/// `a::b::Thing<c::D>` -> `Thing<c::D>`
fn short_type_name(full: &str) -> &str {
    let generic_start = full.find('<').unwrap_or(full.len());
    let head = &full[..generic_start];
    match head.rfind("::") {
        Some(idx) => &full[idx + 2..],
        None => full,
    }
}
