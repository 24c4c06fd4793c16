use std::future::Future;

use tokio::runtime::{Builder, Handle, Runtime};

/// Tokio runtime that drives subprocesses and the dispatch listener behind the
/// blocking public API.
///
/// Dropping it never blocks: the runtime is shut down in the background, so the
/// last reference may go away on any thread, including one of its own.
pub(crate) struct Executor {
    runtime: Option<Runtime>,
}

impl Executor {
    pub(crate) fn new(worker_threads: usize) -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("hsbridge-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        self.runtime
            .as_ref()
            .map(Runtime::handle)
            .unwrap_or_else(|| unreachable!("runtime is only taken on drop"))
    }

    /// Run a future to completion on the calling thread.
    ///
    /// Usable from plain threads and from the blocking pool (host callbacks
    /// run there), but not from inside an async task.
    pub(crate) fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.handle().block_on(future)
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
