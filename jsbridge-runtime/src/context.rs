//! Guest execution context
//!
//! The guest engine is single-threaded. `GuestContext` lives on the guest
//! thread, owns the environment and drains the hand-off queue; any thread may
//! hold a `ContextHandle` to post work onto it. Work posted from the guest
//! thread itself still goes through the queue, so task settlement and
//! finalization release always happen at a well-defined point: the next
//! `run_pending`.
//!
//! Several contexts may share one thread. Each registers its environment
//! under its own id, and a handle only ever reaches the environment of the
//! context that issued it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::error::{ContextError, JsError, JsResult};
use crate::guest::{JsEnv, JsValue, RefId};

type Job = Box<dyn FnOnce(&dyn JsEnv) + Send>;

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Environments of the live contexts bound to this thread, by context id.
    static ENVIRONMENTS: RefCell<HashMap<u64, Rc<dyn JsEnv>>> = RefCell::new(HashMap::new());
}

pub struct GuestContext {
    env: Rc<dyn JsEnv>,
    handle: ContextHandle,
    queue: flume::Receiver<Job>,
}

impl GuestContext {
    /// Bind `env` to the calling thread, which becomes the guest thread.
    pub fn new(env: Rc<dyn JsEnv>) -> Self {
        let (sender, queue) = flume::unbounded();
        let id = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
        ENVIRONMENTS.with(|envs| envs.borrow_mut().insert(id, env.clone()));
        let handle = ContextHandle {
            sender,
            thread: thread::current().id(),
            id,
        };
        debug!(context = id, thread = ?handle.thread, "guest context created");
        Self { env, handle, queue }
    }

    pub fn env(&self) -> &dyn JsEnv {
        &*self.env
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }

    /// Run every job queued so far, including jobs queued by those jobs.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.queue.try_recv() {
            job(&*self.env);
            ran += 1;
        }
        if ran > 0 {
            trace!(jobs = ran, "drained guest queue");
        }
        ran
    }

    /// Pump the queue until `done` holds or `timeout` elapses. Returns
    /// whether `done` was observed.
    pub fn run_until(&self, mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(Duration::from_millis(10));
            if let Ok(job) = self.queue.recv_timeout(slice) {
                job(&*self.env);
            }
        }
    }
}

impl Drop for GuestContext {
    fn drop(&mut self) {
        let id = self.handle.id;
        let _ = ENVIRONMENTS.try_with(|envs| envs.borrow_mut().remove(&id));
        debug!(context = id, pending = self.queue.len(), "guest context dropped");
    }
}

/// Thread-safe handle for posting work to the guest thread.
#[derive(Clone)]
pub struct ContextHandle {
    sender: flume::Sender<Job>,
    thread: ThreadId,
    id: u64,
}

impl ContextHandle {
    pub fn is_guest_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    /// Run `f` inline against this context's environment. Only possible on
    /// the guest thread while the context is alive.
    pub fn with_env<R>(&self, f: impl FnOnce(&dyn JsEnv) -> R) -> Result<R, ContextError> {
        if !self.is_guest_thread() {
            return Err(ContextError::NoEnvironment);
        }
        let env = ENVIRONMENTS
            .try_with(|envs| envs.borrow().get(&self.id).cloned())
            .ok()
            .flatten()
            .ok_or(ContextError::Closed)?;
        Ok(f(&*env))
    }

    /// Queue `job` for the next `run_pending` on the guest thread.
    pub fn post(&self, job: impl FnOnce(&dyn JsEnv) + Send + 'static) -> Result<(), ContextError> {
        self.sender
            .send(Box::new(job))
            .map_err(|_| ContextError::Closed)
    }

    /// Run `job` on the guest thread and wait for its result. On the guest
    /// thread the job runs inline; elsewhere it is posted and the caller
    /// blocks until the guest thread drains its queue.
    pub fn run<R: Send + 'static>(
        &self,
        job: impl FnOnce(&dyn JsEnv) -> R + Send + 'static,
    ) -> Result<R, ContextError> {
        if self.is_guest_thread() {
            return self.with_env(job);
        }
        let (tx, rx) = flume::bounded(1);
        self.post(move |env| {
            let _ = tx.send(job(env));
        })?;
        rx.recv().map_err(|_| ContextError::Closed)
    }
}

/// Strong reference to a guest value held by host code. Dropping it releases
/// the reference on the guest thread.
pub struct GuestReference {
    id: RefId,
    context: ContextHandle,
}

impl GuestReference {
    pub fn new(env: &dyn JsEnv, value: JsValue, context: ContextHandle) -> JsResult<Self> {
        let id = env.create_reference(value, true)?;
        Ok(Self { id, context })
    }

    pub fn id(&self) -> RefId {
        self.id
    }

    pub fn value(&self, env: &dyn JsEnv) -> JsResult<JsValue> {
        env.reference_value(self.id).ok_or(JsError::InvalidHandle)
    }

    pub fn context(&self) -> &ContextHandle {
        &self.context
    }
}

impl Drop for GuestReference {
    fn drop(&mut self) {
        let id = self.id;
        let released = if self.context.is_guest_thread() {
            self.context.with_env(|env| env.delete_reference(id))
        } else {
            self.context.post(move |env| env.delete_reference(id))
        };
        if released.is_err() {
            trace!(reference = ?id, "guest context gone; reference dropped with it");
        }
    }
}

impl std::fmt::Debug for GuestReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GuestReference({:?})", self.id)
    }
}
