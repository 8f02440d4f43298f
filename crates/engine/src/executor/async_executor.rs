//! Tenant-keyed loop sets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::loops::{drive, AcquireJobsLoop, ResetExpiredLoop, TimerLoop};
use super::pool::WorkerPool;
use crate::command::CommandExecutor;

struct TenantLoops {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Runs the acquisition, timer and reset-expired loops, one set per tenant.
///
/// A tenant-agnostic deployment runs a single set under the `None` key.
/// Loop sets are independent: stopping one tenant leaves the others
/// running.
pub struct AsyncExecutor {
    executor: Arc<CommandExecutor>,
    pool: Arc<dyn WorkerPool>,
    acquire_jobs: bool,
    tenants: Mutex<HashMap<Option<String>, TenantLoops>>,
}

impl AsyncExecutor {
    pub fn new(executor: Arc<CommandExecutor>, pool: Arc<dyn WorkerPool>) -> Self {
        Self {
            executor,
            pool,
            acquire_jobs: true,
            tenants: Mutex::new(HashMap::new()),
        }
    }

    /// Skip the acquisition loop. Used when jobs arrive through a message
    /// channel; the timer and reset-expired loops still run.
    pub fn without_job_acquisition(mut self) -> Self {
        self.acquire_jobs = false;
        self
    }

    /// Start loop sets for the configured tenants, or a single
    /// tenant-agnostic set when none are configured.
    pub fn start(&self) {
        let tenants = self.executor.services().config.tenants.clone();
        if tenants.is_empty() {
            self.add_tenant(None);
        } else {
            for tenant in tenants {
                self.add_tenant(Some(tenant));
            }
        }
    }

    /// Start the loop set of a tenant. Returns `false` if it already runs.
    pub fn add_tenant(&self, tenant_id: Option<String>) -> bool {
        let mut tenants = self.tenants.lock().unwrap_or_else(PoisonError::into_inner);
        if tenants.contains_key(&tenant_id) {
            return false;
        }

        let (stop, stop_rx) = watch::channel(false);
        let signals = self.executor.services().job_manager.signals().clone();
        let wake: Arc<Notify> = signals.register(tenant_id.clone());

        let mut handles = Vec::with_capacity(3);
        if self.acquire_jobs {
            handles.push(tokio::spawn(drive(
                AcquireJobsLoop::new(self.executor.clone(), self.pool.clone(), tenant_id.clone()),
                stop_rx.clone(),
                Some(wake),
            )));
        }
        handles.push(tokio::spawn(drive(
            TimerLoop::new(self.executor.clone(), tenant_id.clone()),
            stop_rx.clone(),
            None,
        )));
        handles.push(tokio::spawn(drive(
            ResetExpiredLoop::new(self.executor.clone(), tenant_id.clone()),
            stop_rx,
            None,
        )));

        tracing::info!(tenant = ?tenant_id, loops = handles.len(), "Async executor started for tenant");
        tenants.insert(tenant_id, TenantLoops { stop, handles });
        true
    }

    /// Stop a tenant's loops and wait for them to finish. Returns `false`
    /// if the tenant had no loops.
    pub async fn remove_tenant(&self, tenant_id: Option<&str>) -> bool {
        let key = tenant_id.map(str::to_string);
        let removed = self
            .tenants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);

        let Some(loops) = removed else {
            return false;
        };
        self.executor
            .services()
            .job_manager
            .signals()
            .unregister(tenant_id);
        stop_and_join(loops).await;
        tracing::info!(tenant = ?tenant_id, "Async executor stopped for tenant");
        true
    }

    pub fn active_tenants(&self) -> Vec<Option<String>> {
        let mut tenants: Vec<Option<String>> = self
            .tenants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        tenants.sort();
        tenants
    }

    /// Stop every loop set.
    pub async fn shutdown(&self) {
        let all: Vec<(Option<String>, TenantLoops)> = self
            .tenants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let signals = self.executor.services().job_manager.signals().clone();
        for (tenant_id, loops) in all {
            signals.unregister(tenant_id.as_deref());
            stop_and_join(loops).await;
        }
        tracing::info!("Async executor shut down");
    }
}

async fn stop_and_join(loops: TenantLoops) {
    let _ = loops.stop.send(true);
    for handle in loops.handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Executor loop task ended abnormally");
        }
    }
}
