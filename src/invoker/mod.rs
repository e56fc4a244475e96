//! Background workers running queued tasks

mod checker;
mod compile_context;
mod judge_solution;
mod registry;
mod task;
mod update_problem_package;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use registry::TaskRegistry;
use task::{TaskContext, PING_DURATION};

use crate::compilers::CompilerImageManager;
use crate::models::TaskStatus;
use crate::problems::ProblemPackageManager;
use crate::storage::FileManager;
use crate::store::Core;

/// Pause of an idle worker before it polls again
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Separate budget for the final status write of a task
const STATUS_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Invoker {
    core: Core,
    files: FileManager,
    compiler_images: CompilerImageManager,
    problem_packages: ProblemPackageManager,
    registry: TaskRegistry,
    /// Claims by workers of this invoker go one at a time
    pop_lock: Mutex<()>,
}

impl Invoker {
    pub fn new(
        core: Core,
        files: FileManager,
        compiler_images: CompilerImageManager,
        problem_packages: ProblemPackageManager,
    ) -> Self {
        Self {
            core,
            files,
            compiler_images,
            problem_packages,
            registry: TaskRegistry::default(),
            pop_lock: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Run `workers` daemons until `shutdown` is canceled
    pub async fn run(self: Arc<Self>, workers: usize, shutdown: CancellationToken) {
        info!("Starting {} invoker workers", workers);
        let daemons = (0..workers).map(|i| {
            let invoker = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(
                async move { invoker.run_daemon(&shutdown).await }
                    .instrument(info_span!("worker", name = %format!("invoker-{}", i + 1))),
            )
        });
        for result in join_all(daemons).await {
            if let Err(err) = result {
                error!("Invoker worker panicked: {}", err);
            }
        }
        info!("Invoker workers stopped");
    }

    async fn run_daemon(&self, shutdown: &CancellationToken) {
        let mut ticker = interval_at(Instant::now() + POLL_INTERVAL, POLL_INTERVAL);
        while !shutdown.is_cancelled() {
            if self.run_tick(shutdown).await {
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
        }
    }

    /// Claim and run at most one task; `false` when the queue had nothing
    pub async fn run_tick(&self, shutdown: &CancellationToken) -> bool {
        if shutdown.is_cancelled() {
            return true;
        }
        let task = {
            let _guard = self.pop_lock.lock().await;
            self.core.tasks.pop_queued(PING_DURATION).await
        };
        let task = match task {
            Ok(Some(task)) => task,
            Ok(None) => return false,
            Err(err) => {
                error!("Cannot pop queued task: {:#}", err);
                return false;
            }
        };
        let span = info_span!("task", task_id = task.id, kind = %task.kind);
        async {
            let ctx = TaskContext::start(self.core.tasks.clone(), task, shutdown);
            self.execute(&ctx).await;
            ctx.close().await;
        }
        .instrument(span)
        .await;
        true
    }

    async fn execute(&self, ctx: &TaskContext) {
        let Some(mut task) = self.registry.new_task(ctx.kind(), self) else {
            error!("Unsupported task: {}", ctx.kind());
            self.finish(ctx, TaskStatus::Failed).await;
            return;
        };
        info!("Executing task");
        match task.execute(ctx).await {
            Ok(()) => {
                info!("Task succeeded");
                self.finish(ctx, TaskStatus::Succeeded).await;
            }
            Err(err) => {
                error!("Task failed: {:#}", err);
                self.finish(ctx, TaskStatus::Failed).await;
            }
        }
    }

    async fn finish(&self, ctx: &TaskContext, status: TaskStatus) {
        match tokio::time::timeout(STATUS_TIMEOUT, ctx.set_status(status)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("Unable to set {:?} task status: {:#}", status, err),
            Err(_) => error!("Unable to set {:?} task status: timed out", status),
        }
    }
}
