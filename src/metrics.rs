use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
///
/// Safe to call multiple times (e.g. in tests) — subsequent calls return a
/// new handle but silently ignore the global recorder installation error.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = match builder.install_recorder() {
        Ok(h) => h,
        Err(_) => {
            // Recorder already installed (happens in tests).
            PrometheusBuilder::new().build_recorder().handle()
        }
    };

    // Pre-register counters so they appear even before the first increment.
    counter!("ticks_run_total").absolute(0);
    counter!("ticks_skipped_lock_total").absolute(0);
    counter!("ticks_failed_total").absolute(0);
    counter!("activities_ingested_total").absolute(0);
    counter!("activities_executed_total").absolute(0);
    counter!("activities_skipped_total").absolute(0);
    counter!("orders_filled_total").absolute(0);
    counter!("orders_failed_total").absolute(0);
    counter!("positions_force_closed_total").absolute(0);
    counter!("redemptions_total").absolute(0);

    gauge!("scheduled_tasks").set(0.0);

    histogram!("tick_latency_seconds").record(0.0);

    handle
}
