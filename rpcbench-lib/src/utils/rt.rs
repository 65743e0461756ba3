use std::future::Future;

use rama::error::{BoxError, ErrorContext as _};
use tokio::{
    runtime::{Builder, Handle, Runtime},
    task::JoinHandle,
};

use super::env;

/// A dedicated multi threaded runtime owned by one benchmark scenario.
///
/// Dropping it shuts the runtime down in the background, which makes it
/// safe to drop from within another runtime.
#[derive(Debug)]
pub struct ScenarioRuntime {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl ScenarioRuntime {
    /// `threads == 0` means one worker thread per core.
    pub fn new(name: &'static str, threads: usize) -> Result<Self, BoxError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(env::resolve_thread_count(threads))
            .thread_name(format!("{}-{name}", env::project_name()))
            .enable_all()
            .build()
            .context("build scenario runtime")
            .context_str_field("name", name)?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future<Output: Send + 'static> + Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl Drop for ScenarioRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
