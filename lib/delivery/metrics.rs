/// Delivery counters, keyed by source and destination.
///
/// Calls are fire-and-forget: implementations must not block and cannot fail the delivery.
pub trait DeliveryMetrics: Send + Sync {
    fn success_source_events(&self, source_id: &str, destination: &str, count: usize);
    fn error_source_events(&self, source_id: &str, destination: &str, count: usize);
    fn success_objects(&self, source_id: &str, count: usize);
    fn error_objects(&self, source_id: &str, count: usize);
}

/// Discards every measurement.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDeliveryMetrics;

impl DeliveryMetrics for NoopDeliveryMetrics {
    fn success_source_events(&self, _source_id: &str, _destination: &str, _count: usize) {}
    fn error_source_events(&self, _source_id: &str, _destination: &str, _count: usize) {}
    fn success_objects(&self, _source_id: &str, _count: usize) {}
    fn error_objects(&self, _source_id: &str, _count: usize) {}
}
