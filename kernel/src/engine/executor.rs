//! The scheduling substrate that scans and writes run their tasks on.
//!
//! The dataset kernel never creates threads on its own: every concurrent piece of work (a
//! fragment scan, the compute applied to one batch, the sink of one output file) is handed to a
//! [`TaskExecutor`]. Two implementations over tokio are provided in [`tokio`].

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::{AbortHandle, Abortable, BoxFuture, FutureExt};
use ::tokio::sync::oneshot;

use crate::{DatasetResult, Error};

/// An executor that runs futures in the background.
pub trait TaskExecutor: Send + Sync + Debug {
    /// Run the future in the background. The future must run to completion even if nothing
    /// awaits it.
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// A handle on the result of a task started with [`spawn_with_result`]. Dropping the handle
/// aborts the task the next time it yields.
#[derive(Debug)]
#[must_use = "dropping a TaskHandle aborts its task"]
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<T>,
    abort: AbortHandle,
}

impl<T> TaskHandle<T> {
    /// Aborts the task. A handle whose task was aborted resolves to [`Error::Cancelled`].
    pub fn abort(&self) {
        self.abort.abort();
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = DatasetResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll(cx).map(|result| {
            result.map_err(|_| {
                if this.abort.is_aborted() {
                    Error::cancelled("task was aborted")
                } else {
                    Error::join_failure("task panicked or was dropped by its executor")
                }
            })
        })
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Runs `task` on `executor`, returning a handle that resolves to its output.
pub fn spawn_with_result<T, F>(executor: &dyn TaskExecutor, task: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let (sender, receiver) = oneshot::channel();
    let (abort, registration) = AbortHandle::new_pair();
    let task = Abortable::new(task, registration).map(move |result| {
        if let Ok(output) = result {
            // The handle may be gone already
            let _ = sender.send(output);
        }
    });
    executor.spawn(task.boxed());
    TaskHandle { receiver, abort }
}

pub mod tokio {
    //! [`TaskExecutor`] implementations backed by tokio.

    use futures::future::BoxFuture;
    use tokio::runtime::{Handle, RuntimeFlavor};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
    use tracing::warn;

    use super::TaskExecutor;
    use crate::{DatasetResult, Error};

    /// A [`TaskExecutor`] that spawns onto a separate thread which runs its own current-thread
    /// tokio runtime. Usable from synchronous code that has no runtime of its own. Tasks still
    /// running when the executor is dropped are cancelled.
    #[derive(Debug)]
    pub struct TokioBackgroundExecutor {
        sender: UnboundedSender<BoxFuture<'static, ()>>,
    }

    impl Default for TokioBackgroundExecutor {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TokioBackgroundExecutor {
        pub fn new() -> Self {
            let (sender, mut receiver) = unbounded_channel::<BoxFuture<'static, ()>>();
            std::thread::spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        warn!("Failed to start background executor runtime: {err}");
                        return;
                    }
                };
                runtime.block_on(async move {
                    while let Some(task) = receiver.recv().await {
                        tokio::task::spawn(task);
                    }
                });
            });
            Self { sender }
        }
    }

    impl TaskExecutor for TokioBackgroundExecutor {
        fn spawn(&self, task: BoxFuture<'static, ()>) {
            if self.sender.send(task).is_err() {
                warn!("Background executor is gone; dropping task");
            }
        }
    }

    /// A [`TaskExecutor`] that spawns onto an existing tokio runtime.
    #[derive(Debug, Clone)]
    pub struct TokioMultiThreadExecutor {
        handle: Handle,
    }

    impl TokioMultiThreadExecutor {
        pub fn new(handle: Handle) -> Self {
            if handle.runtime_flavor() != RuntimeFlavor::MultiThread {
                warn!("Spawning onto a current-thread runtime; tasks will not run in parallel");
            }
            Self { handle }
        }

        /// An executor for the runtime the caller is running on.
        pub fn current() -> DatasetResult<Self> {
            let handle = Handle::try_current()
                .map_err(|err| Error::generic(format!("No tokio runtime available: {err}")))?;
            Ok(Self::new(handle))
        }
    }

    impl TaskExecutor for TokioMultiThreadExecutor {
        fn spawn(&self, task: BoxFuture<'static, ()>) {
            // Tasks are detached; results flow back through channels
            drop(self.handle.spawn(task));
        }
    }

    #[cfg(test)]
    mod tests {
        use std::sync::Arc;
        use std::time::Duration;

        use super::super::spawn_with_result;
        use super::*;

        #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
        async fn test_multi_thread_executor_returns_results() {
            let executor = TokioMultiThreadExecutor::current().unwrap();
            let handles: Vec<_> = (0..8u64)
                .map(|i| {
                    spawn_with_result(&executor, async move {
                        tokio::time::sleep(Duration::from_millis(8 - i)).await;
                        i * 2
                    })
                })
                .collect();
            let results = futures::future::try_join_all(handles).await.unwrap();
            assert_eq!(results, vec![0, 2, 4, 6, 8, 10, 12, 14]);
        }

        #[test]
        fn test_background_executor_from_sync_code() {
            let executor = TokioBackgroundExecutor::new();
            let handle = spawn_with_result(&executor, async { 21 * 2 });
            assert_eq!(futures::executor::block_on(handle).unwrap(), 42);
        }

        #[tokio::test]
        async fn test_dropping_handle_aborts_task() {
            let executor = TokioMultiThreadExecutor::current().unwrap();
            let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
            let flag = finished.clone();
            let handle = spawn_with_result(&executor, async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
            });
            drop(handle);
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(!finished.load(std::sync::atomic::Ordering::SeqCst));

            let handle = spawn_with_result(&executor, std::future::pending::<()>());
            handle.abort();
            assert!(matches!(handle.await, Err(Error::Cancelled(_))));
        }
    }
}
