//! Wake-up signals for the acquisition loops.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Notify;

/// Tenant-keyed wake-up notifiers.
///
/// The acquisition loop of a tenant registers here; committed job
/// creations notify it so new work is picked up without waiting a full
/// idle interval. Tenants without a loop of their own fall back to the
/// tenant-agnostic loop (`None` key), if one runs.
#[derive(Debug, Default)]
pub struct JobSignals {
    notifiers: RwLock<HashMap<Option<String>, Arc<Notify>>>,
}

impl JobSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tenant_id: Option<String>) -> Arc<Notify> {
        self.notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    pub fn unregister(&self, tenant_id: Option<&str>) {
        self.notifiers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&tenant_id.map(str::to_string));
    }

    /// Wake the loop serving `tenant_id`. Returns whether one was found.
    pub fn notify(&self, tenant_id: Option<&str>) -> bool {
        let notifiers = self.notifiers.read().unwrap_or_else(PoisonError::into_inner);
        let notifier = notifiers
            .get(&tenant_id.map(str::to_string))
            .or_else(|| notifiers.get(&None));

        match notifier {
            Some(notify) => {
                notify.notify_one();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_falls_back_to_agnostic_loop() {
        let signals = JobSignals::new();
        assert!(!signals.notify(Some("acme")));

        signals.register(None);
        assert!(signals.notify(Some("acme")));

        signals.unregister(None);
        assert!(!signals.notify(None));
    }

    #[tokio::test]
    async fn test_notification_is_not_lost_before_wait() {
        let signals = JobSignals::new();
        let notify = signals.register(Some("acme".to_string()));
        signals.notify(Some("acme"));

        // The stored permit completes the wait immediately.
        tokio::time::timeout(std::time::Duration::from_secs(1), notify.notified())
            .await
            .unwrap();
    }
}
