use crate::build_info;
use crate::delivery::DeliveryMetrics;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Registers immutable build metadata for `/metrics` scraping.
///
/// Encoded as a labeled gauge with value `1` so the metric carries stable build labels.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "ingest_relay",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone)]
pub struct QueueMetrics {
    /// Requests the handler accepted.
    pub processed: Counter,
    /// Handler failures, including ones that were retried.
    pub failed: Counter,
    pub retried: Counter,
    /// Requests dropped after their last allowed attempt.
    pub dead_lettered: Counter,
    /// Queue records that could not be decoded and were skipped.
    pub corrupt_records: Counter,
    pub queue_depth: Gauge,
    pub workers_alive: Gauge,
}

impl QueueMetrics {
    fn init() -> Self {
        Self {
            processed: Counter::default(),
            failed: Counter::default(),
            retried: Counter::default(),
            dead_lettered: Counter::default(),
            corrupt_records: Counter::default(),
            queue_depth: Gauge::default(),
            workers_alive: Gauge::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "requests_processed",
            "Total number of queued requests handled successfully",
            metrics.processed.clone(),
        );
        sub_registry.register(
            "requests_failed",
            "Total number of failed request handling attempts",
            metrics.failed.clone(),
        );
        sub_registry.register(
            "requests_retried",
            "Total number of requests re-enqueued for another attempt",
            metrics.retried.clone(),
        );
        sub_registry.register(
            "requests_dead_lettered",
            "Total number of requests dropped after exhausting their attempts",
            metrics.dead_lettered.clone(),
        );
        sub_registry.register(
            "corrupt_records",
            "Total number of undecodable queue records skipped",
            metrics.corrupt_records.clone(),
        );
        sub_registry.register(
            "depth",
            "Requests waiting in the durable queue",
            metrics.queue_depth.clone(),
        );
        sub_registry.register(
            "workers_alive",
            "Number of live queue worker tasks",
            metrics.workers_alive.clone(),
        );
        metrics
    }
}

pub static QUEUE_METRICS: OnceCell<QueueMetrics> = OnceCell::const_new();

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SourceDestinationLabels {
    source_id: String,
    destination: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SourceLabels {
    source_id: String,
}

/// Delivery counters exported through a Prometheus registry.
#[derive(Clone, Default)]
pub struct PrometheusDeliveryMetrics {
    success_source_events: Family<SourceDestinationLabels, Counter>,
    error_source_events: Family<SourceDestinationLabels, Counter>,
    success_objects: Family<SourceLabels, Counter>,
    error_objects: Family<SourceLabels, Counter>,
}

impl PrometheusDeliveryMetrics {
    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::default();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "source_events_success",
            "Source events stored per destination",
            metrics.success_source_events.clone(),
        );
        sub_registry.register(
            "source_events_error",
            "Source events a destination failed to store",
            metrics.error_source_events.clone(),
        );
        sub_registry.register(
            "source_objects_success",
            "Source objects stored",
            metrics.success_objects.clone(),
        );
        sub_registry.register(
            "source_objects_error",
            "Source objects that failed to store",
            metrics.error_objects.clone(),
        );
        metrics
    }

    fn per_destination(source_id: &str, destination: &str) -> SourceDestinationLabels {
        SourceDestinationLabels {
            source_id: source_id.to_string(),
            destination: destination.to_string(),
        }
    }

    fn per_source(source_id: &str) -> SourceLabels {
        SourceLabels {
            source_id: source_id.to_string(),
        }
    }
}

impl DeliveryMetrics for PrometheusDeliveryMetrics {
    fn success_source_events(&self, source_id: &str, destination: &str, count: usize) {
        self.success_source_events
            .get_or_create(&Self::per_destination(source_id, destination))
            .inc_by(count as u64);
    }

    fn error_source_events(&self, source_id: &str, destination: &str, count: usize) {
        self.error_source_events
            .get_or_create(&Self::per_destination(source_id, destination))
            .inc_by(count as u64);
    }

    fn success_objects(&self, source_id: &str, count: usize) {
        self.success_objects
            .get_or_create(&Self::per_source(source_id))
            .inc_by(count as u64);
    }

    fn error_objects(&self, source_id: &str, count: usize) {
        self.error_objects
            .get_or_create(&Self::per_source(source_id))
            .inc_by(count as u64);
    }
}
