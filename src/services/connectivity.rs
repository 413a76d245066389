use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::db::Backend;
use crate::services::metrics::BACKEND_UP;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConnectivityStatus {
    /// `None` until the first probe completes.
    pub online: Option<bool>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Polls the backend and publishes reachability.
pub struct ConnectivityMonitor {
    backend: Arc<dyn Backend>,
    tx: watch::Sender<ConnectivityStatus>,
}

impl ConnectivityMonitor {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (tx, _) = watch::channel(ConnectivityStatus {
            online: None,
            last_checked: None,
            last_error: None,
        });
        Self { backend, tx }
    }

    pub fn status(&self) -> ConnectivityStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.tx.subscribe()
    }

    /// One probe; also the manual retry action.
    pub async fn check(&self) -> ConnectivityStatus {
        let result = self.backend.ping().await;
        let was_online = self.tx.borrow().online;
        let status = ConnectivityStatus {
            online: Some(result.is_ok()),
            last_checked: Some(Utc::now()),
            last_error: result.err().map(|e| e.to_string()),
        };

        BACKEND_UP.set(if status.online == Some(true) { 1.0 } else { 0.0 });
        match (&status.last_error, was_online) {
            (Some(e), Some(true) | None) => warn!("Backend unreachable: {e}"),
            (None, Some(false)) => info!("Backend reachable again"),
            _ => {}
        }
        self.tx.send_replace(status.clone());
        status
    }

    /// Spawn the periodic probe.
    pub fn start(self: &Arc<Self>, interval_secs: u64) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                monitor.check().await;
                tokio::time::sleep(tokio::time::Duration::from_secs(interval_secs)).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryBackend;

    #[tokio::test]
    async fn probe_reports_outage_and_recovery() {
        let memory = Arc::new(MemoryBackend::new());
        let monitor = ConnectivityMonitor::new(memory.clone());
        assert_eq!(monitor.status().online, None);

        memory.set_offline(true);
        let status = monitor.check().await;
        assert_eq!(status.online, Some(false));
        assert!(status.last_error.is_some());

        memory.set_offline(false);
        assert_eq!(monitor.check().await.online, Some(true));
        assert_eq!(monitor.status().last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_probe_publishes() {
        let memory = Arc::new(MemoryBackend::new());
        let monitor = Arc::new(ConnectivityMonitor::new(memory));
        let mut rx = monitor.subscribe();

        let task = monitor.start(30);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().online, Some(true));
        task.abort();
    }
}
