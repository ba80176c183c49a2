//! Host asynchronous results
//!
//! A `HostTask` settles exactly once. Continuations registered before
//! settlement run on the thread that completes the task; registered after,
//! they run immediately on the registering thread. Moving the result onto the
//! guest thread is the caller's job (see the linker's promise bridge).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::channel::oneshot;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::HostError;
use crate::value::HostValue;

pub type Completion = Result<HostValue, HostError>;
type Continuation = Box<dyn FnOnce(Completion) + Send>;

enum TaskState {
    Pending(Vec<Continuation>),
    Done(Completion),
}

#[derive(Clone)]
pub struct HostTask(Arc<Mutex<TaskState>>);

impl HostTask {
    /// Create an unsettled task and the handle that settles it.
    pub fn pending() -> (HostTask, TaskCompleter) {
        let state = Arc::new(Mutex::new(TaskState::Pending(Vec::new())));
        (
            HostTask(state.clone()),
            TaskCompleter {
                state: Some(state),
            },
        )
    }

    pub fn completed(result: Completion) -> Self {
        HostTask(Arc::new(Mutex::new(TaskState::Done(result))))
    }

    /// Drive `future` on a tokio runtime and settle with its output.
    pub fn spawn<F>(handle: &tokio::runtime::Handle, future: F) -> Self
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let (task, completer) = Self::pending();
        handle.spawn(async move {
            completer.complete(future.await);
        });
        task
    }

    pub fn on_complete(&self, continuation: impl FnOnce(Completion) + Send + 'static) {
        let ready = {
            let mut state = self.0.lock();
            match &mut *state {
                TaskState::Pending(waiters) => {
                    waiters.push(Box::new(continuation));
                    return;
                }
                TaskState::Done(result) => result.clone(),
            }
        };
        continuation(ready);
    }

    pub fn is_completed(&self) -> bool {
        matches!(&*self.0.lock(), TaskState::Done(_))
    }

    pub fn try_result(&self) -> Option<Completion> {
        match &*self.0.lock() {
            TaskState::Done(result) => Some(result.clone()),
            TaskState::Pending(_) => None,
        }
    }

    pub fn into_future(self) -> impl Future<Output = Completion> {
        let (tx, rx) = oneshot::channel();
        self.on_complete(move |result| {
            let _ = tx.send(result);
        });
        async move {
            rx.await.unwrap_or_else(|_| {
                Err(HostError::exception("TaskCanceledException", "task was abandoned"))
            })
        }
    }

    /// Block the current thread until the task settles.
    pub fn wait(&self) -> Completion {
        futures::executor::block_on(self.clone().into_future())
    }

    pub fn ptr_eq(&self, other: &HostTask) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for HostTask {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for HostTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostTask(completed={})", self.is_completed())
    }
}

/// Settles a pending `HostTask`. Dropping it unsettled cancels the task.
pub struct TaskCompleter {
    state: Option<Arc<Mutex<TaskState>>>,
}

impl TaskCompleter {
    pub fn complete(mut self, result: Completion) {
        self.settle(result);
    }

    fn settle(&mut self, result: Completion) {
        let Some(state) = self.state.take() else {
            return;
        };
        let waiters = {
            let mut guard = state.lock();
            match std::mem::replace(&mut *guard, TaskState::Done(result.clone())) {
                TaskState::Pending(waiters) => waiters,
                TaskState::Done(_) => Vec::new(),
            }
        };
        trace!(waiters = waiters.len(), ok = result.is_ok(), "host task settled");
        for waiter in waiters {
            waiter(result.clone());
        }
    }
}

impl Drop for TaskCompleter {
    fn drop(&mut self) {
        if self.state.is_some() {
            self.settle(Err(HostError::exception(
                "TaskCanceledException",
                "task was abandoned before completion",
            )));
        }
    }
}
