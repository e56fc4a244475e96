//! Handle of a claimed task
//!
//! A claimed task is `Running` with a lease (`expire_time`). While the task
//! executes, a pinger renews the lease and cancels the task once it has
//! expired. Writes are refused for tasks that stopped running or whose lease
//! is over, so a worker that lost its task cannot overwrite the next owner.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::core::utils::unix_now;
use crate::models::{Task, TaskKind, TaskStatus};
use crate::store::TaskStore;

/// Shortest lease a ping can request
pub const MIN_LEASE: Duration = Duration::from_secs(2);
/// Lease granted on claim and on every renewal
pub const PING_DURATION: Duration = Duration::from_secs(20);

const PINGER_INTERVAL: Duration = Duration::from_secs(1);

struct Shared {
    tasks: Arc<dyn TaskStore>,
    task: Mutex<Task>,
}

fn check(task: &Task) -> Result<()> {
    if task.status != TaskStatus::Running {
        bail!("Task {} is not running", task.id);
    }
    match task.expire_time {
        Some(expire_time) if unix_now() < expire_time => Ok(()),
        _ => bail!("Task {} is expired", task.id),
    }
}

/// Time left until the lease of `task` is over
fn lease_left(task: &Task) -> Duration {
    let left = task.expire_time.unwrap_or(0) - unix_now();
    Duration::from_secs(left.max(0) as u64)
}

impl Shared {
    /// Apply `change` to a copy of the task and persist it before the
    /// current lease runs out
    async fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let mut task = self.task.lock().await;
        check(&task)?;
        let mut updated = task.clone();
        change(&mut updated)?;
        tokio::time::timeout(lease_left(&task), self.tasks.update(&updated))
            .await
            .map_err(|_| anyhow!("Task {} is expired", task.id))??;
        *task = updated;
        Ok(())
    }

    async fn ping(&self, duration: Duration) -> Result<()> {
        let duration = duration.max(MIN_LEASE);
        self.update(|task| {
            task.expire_time = Some(unix_now() + duration.as_secs() as i64);
            Ok(())
        })
        .await
    }

    /// Lease expiration while the task is running
    async fn running_expire_time(&self) -> Option<i64> {
        let task = self.task.lock().await;
        (task.status == TaskStatus::Running).then(|| task.expire_time.unwrap_or(0))
    }
}

/// Running task as seen by its implementation
pub struct TaskContext {
    shared: Arc<Shared>,
    kind: TaskKind,
    cancel: CancellationToken,
    pinger: Option<JoinHandle<()>>,
}

impl TaskContext {
    /// Take over a claimed task and start renewing its lease.
    ///
    /// The task is canceled when `parent` is canceled or the lease expires.
    pub fn start(tasks: Arc<dyn TaskStore>, task: Task, parent: &CancellationToken) -> Self {
        let kind = task.kind;
        let shared = Arc::new(Shared {
            tasks,
            task: Mutex::new(task),
        });
        let cancel = parent.child_token();
        let pinger = tokio::spawn(
            run_pinger(shared.clone(), cancel.clone()).in_current_span(),
        );
        Self {
            shared,
            kind,
            cancel,
            pinger: Some(pinger),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Fires when the task must stop
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub async fn scan_config<C: DeserializeOwned>(&self) -> Result<C> {
        self.shared.task.lock().await.scan_config()
    }

    /// Persist progress of the task
    pub async fn set_state<S: Serialize + Sync>(&self, state: &S) -> Result<()> {
        self.shared
            .update(|task| task.set_state(state))
            .await
            .context("Cannot set task state")
    }

    pub async fn set_status(&self, status: TaskStatus) -> Result<()> {
        self.shared
            .update(|task| {
                task.status = status;
                Ok(())
            })
            .await
            .context("Cannot set task status")
    }

    /// Extend the lease to `duration` from now (at least [`MIN_LEASE`])
    #[cfg(test)]
    pub async fn ping(&self, duration: Duration) -> Result<()> {
        self.shared.ping(duration).await
    }

    /// Cancel the task and stop the pinger
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(pinger) = self.pinger.take() {
            let _ = pinger.await;
        }
    }
}

impl Drop for TaskContext {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(pinger) = self.pinger.take() {
            pinger.abort();
        }
    }
}

async fn run_pinger(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(PINGER_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let Some(expire_time) = shared.running_expire_time().await else {
            return;
        };
        let now = unix_now();
        if now >= expire_time {
            warn!("Task lease expired");
            cancel.cancel();
            return;
        }
        if now + ((PING_DURATION / 2).as_secs() as i64) < expire_time {
            continue;
        }
        match shared.ping(PING_DURATION).await {
            Ok(()) => debug!("Task lease renewed"),
            Err(err) => warn!("Cannot renew task lease: {:#}", err),
        }
    }
}
