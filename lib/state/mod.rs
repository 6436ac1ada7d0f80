use std::sync::Arc;

use crate::delivery::{MetaStorage, ResultSaver, Storage};
use crate::server::monitoring::PrometheusDeliveryMetrics;
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub struct AppState {
    pub shutdown_token: CancellationToken,
    pub registry: RwLock<Registry>,
    delivery_metrics: PrometheusDeliveryMetrics,
}

impl AppState {
    pub fn new(shutdown_token: CancellationToken) -> Self {
        let mut registry = <Registry>::default();
        let delivery_metrics = PrometheusDeliveryMetrics::register(&mut registry, "delivery");
        Self {
            shutdown_token,
            registry: RwLock::new(registry),
            delivery_metrics,
        }
    }

    /// Builds a saver whose counters are served from this state's `/metrics` registry.
    pub fn result_saver(
        &self,
        identifier: impl Into<String>,
        source_id: impl Into<String>,
        tap: impl Into<String>,
        destinations: Vec<Arc<dyn Storage>>,
        meta_storage: Arc<dyn MetaStorage>,
    ) -> ResultSaver {
        ResultSaver::new(
            identifier,
            source_id,
            tap,
            destinations,
            meta_storage,
            Arc::new(self.delivery_metrics.clone()),
        )
    }
}
