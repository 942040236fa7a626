//! The background scheduler and its task handles.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use futures::FutureExt;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::BridgeError;

type Outcome<T> = thread::Result<T>;

/// Owner of the background scheduler.
///
/// Cloning shares the same worker. The worker stops when [`shutdown`] is
/// called or the last clone is dropped; tasks still pending at that point
/// are dropped and their handles report [`BridgeError::Unavailable`].
///
/// [`shutdown`]: SchedulerHandle::shutdown
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    runtime: Handle,
    alive: Arc<AtomicBool>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Clears the alive flag however the worker exits.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SchedulerHandle {
    /// Start a single-threaded tokio runtime on a new thread called `name`.
    pub fn start(name: impl Into<String>) -> Result<Self, BridgeError> {
        let name = name.into();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let alive = Arc::new(AtomicBool::new(false));
        let worker_alive = alive.clone();
        let thread_name = name.clone();

        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                worker_alive.store(true, Ordering::SeqCst);
                let _guard = AliveGuard(worker_alive);
                let _ = ready_tx.send(Ok(runtime.handle().clone()));

                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
                debug!(thread = %thread_name, "Scheduler loop exited");
            })
            .map_err(|e| BridgeError::Start(e.to_string()))?;

        let runtime = match ready_rx.recv() {
            Ok(Ok(handle)) => handle,
            Ok(Err(reason)) => return Err(BridgeError::Start(reason)),
            Err(_) => return Err(BridgeError::Start("worker thread exited early".into())),
        };

        info!(thread = %name, "Background scheduler started");
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                runtime,
                alive,
                stop: Mutex::new(Some(stop_tx)),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the worker thread is still running its scheduler.
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    /// Submit a task and return immediately.
    ///
    /// Tasks run interleaved on the worker; completion order depends only on
    /// the work itself.
    pub fn submit<F>(&self, task: F) -> Result<TaskHandle<F::Output>, BridgeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if !self.is_alive() {
            return Err(BridgeError::Unavailable);
        }
        let (tx, rx) = oneshot::channel();
        self.inner.runtime.spawn(async move {
            let outcome = AssertUnwindSafe(task).catch_unwind().await;
            let _ = tx.send(outcome);
        });
        Ok(TaskHandle::new(rx))
    }

    /// Submit a task and block the calling thread until it completes.
    ///
    /// A panic inside the task is resumed on the calling thread.
    ///
    /// # Panics
    ///
    /// Panics when called from inside an async context, like every blocking
    /// receive in tokio.
    pub fn submit_blocking<F>(&self, task: F) -> Result<F::Output, BridgeError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.submit(task)?.wait()
    }

    /// Run a fallible task to completion, returning its own error unchanged.
    ///
    /// Bridge failures are converted into the caller's error type.
    pub fn run<F, T, E>(&self, task: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<BridgeError> + Send + 'static,
    {
        self.submit_blocking(task)?
    }

    /// Stop the scheduler and wait for the worker thread to exit.
    pub fn shutdown(&self) {
        self.inner.stop();
    }
}

impl Inner {
    fn stop(&self) {
        let sender = self.stop.lock().ok().and_then(|mut s| s.take());
        if let Some(sender) = sender {
            let _ = sender.send(());
        }

        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                warn!(thread = %self.name, "Scheduler thread panicked");
            } else {
                info!(thread = %self.name, "Background scheduler stopped");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Handle to a task submitted with [`SchedulerHandle::submit`].
#[must_use = "dropping a TaskHandle discards the task's result"]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Outcome<T>>,
    ready: Option<Result<Outcome<T>, BridgeError>>,
    taken: bool,
}

impl<T> TaskHandle<T> {
    fn new(rx: oneshot::Receiver<Outcome<T>>) -> Self {
        Self {
            rx,
            ready: None,
            taken: false,
        }
    }

    /// Block until the task finishes and return its output.
    ///
    /// # Panics
    ///
    /// Resumes the task's panic, if it panicked. Also panics when called from
    /// inside an async context.
    pub fn wait(mut self) -> Result<T, BridgeError> {
        if let Some(ready) = self.ready.take() {
            return resolve(ready);
        }
        resolve(self.rx.blocking_recv().map_err(|_| BridgeError::Unavailable))
    }

    /// Await the task from async code.
    pub async fn join(mut self) -> Result<T, BridgeError> {
        if let Some(ready) = self.ready.take() {
            return resolve(ready);
        }
        resolve(self.rx.await.map_err(|_| BridgeError::Unavailable))
    }

    /// Take the result if the task has finished, without blocking.
    ///
    /// Returns `None` while the task is running, and after the result has
    /// already been taken.
    pub fn try_take(&mut self) -> Option<Result<T, BridgeError>> {
        self.poll_ready();
        let ready = self.ready.take()?;
        self.taken = true;
        Some(resolve(ready))
    }

    /// Whether the task has finished (or can no longer finish).
    pub fn is_finished(&mut self) -> bool {
        self.poll_ready();
        self.taken || self.ready.is_some()
    }

    fn poll_ready(&mut self) {
        if self.taken || self.ready.is_some() {
            return;
        }
        match self.rx.try_recv() {
            Ok(outcome) => self.ready = Some(Ok(outcome)),
            Err(oneshot::error::TryRecvError::Empty) => {}
            Err(oneshot::error::TryRecvError::Closed) => {
                self.ready = Some(Err(BridgeError::Unavailable))
            }
        }
    }
}

fn resolve<T>(received: Result<Outcome<T>, BridgeError>) -> Result<T, BridgeError> {
    match received? {
        Ok(value) => Ok(value),
        Err(payload) => panic::resume_unwind(payload),
    }
}
