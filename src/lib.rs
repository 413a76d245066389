// Library exports for the console binary, operator tools and tests
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use config::Config;
use db::Backend;
use services::connectivity::ConnectivityMonitor;
use services::session::SessionHolder;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
    pub config: Arc<Config>,
    pub session: Arc<SessionHolder>,
    pub connectivity: Arc<ConnectivityMonitor>,
}

impl AppState {
    pub fn new(backend: Arc<dyn Backend>, config: Arc<Config>) -> Self {
        let session = Arc::new(SessionHolder::new(backend.clone(), &config));
        let connectivity = Arc::new(ConnectivityMonitor::new(backend.clone()));
        Self {
            backend,
            config,
            session,
            connectivity,
        }
    }
}
