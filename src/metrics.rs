use crate::store::Statistics;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub hostscan_scans_total: Counter,
    pub hostscan_scan_failures_total: CounterVec,
    pub hostscan_store_operations_total: CounterVec,
    pub hostscan_api_errors_total: CounterVec,
    pub hostscan_results_count: Gauge,
    pub hostscan_results_bytes: Gauge,
    pub hostscan_last_scan_timestamp_seconds: Gauge,
    pub hostscan_uptime_seconds: Gauge,
    pub hostscan_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let hostscan_scans_total = Counter::with_opts(opts!(
            "hostscan_scans_total",
            "Snapshots successfully taken and saved"
        ))?;
        let hostscan_scan_failures_total = CounterVec::new(
            opts!(
                "hostscan_scan_failures_total",
                "Failed scan requests by error kind"
            ),
            &["kind"],
        )?;
        let hostscan_store_operations_total = CounterVec::new(
            opts!(
                "hostscan_store_operations_total",
                "Result store operations served over HTTP"
            ),
            &["op"],
        )?;
        let hostscan_api_errors_total = CounterVec::new(
            opts!(
                "hostscan_api_errors_total",
                "Error responses returned by the API by error kind"
            ),
            &["kind"],
        )?;
        let hostscan_results_count = Gauge::with_opts(opts!(
            "hostscan_results_count",
            "Number of live results in the store"
        ))?;
        let hostscan_results_bytes = Gauge::with_opts(opts!(
            "hostscan_results_bytes",
            "Cumulative size of live result files in bytes"
        ))?;
        let hostscan_last_scan_timestamp_seconds = Gauge::with_opts(opts!(
            "hostscan_last_scan_timestamp_seconds",
            "Unix timestamp of the last saved scan"
        ))?;
        let hostscan_uptime_seconds =
            Gauge::with_opts(opts!("hostscan_uptime_seconds", "Server uptime in seconds"))?;
        let hostscan_scrape_count_total = Counter::with_opts(opts!(
            "hostscan_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &hostscan_scans_total)?;
        register(&registry, &hostscan_scan_failures_total)?;
        register(&registry, &hostscan_store_operations_total)?;
        register(&registry, &hostscan_api_errors_total)?;
        register(&registry, &hostscan_results_count)?;
        register(&registry, &hostscan_results_bytes)?;
        register(&registry, &hostscan_last_scan_timestamp_seconds)?;
        register(&registry, &hostscan_uptime_seconds)?;
        register(&registry, &hostscan_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            hostscan_scans_total,
            hostscan_scan_failures_total,
            hostscan_store_operations_total,
            hostscan_api_errors_total,
            hostscan_results_count,
            hostscan_results_bytes,
            hostscan_last_scan_timestamp_seconds,
            hostscan_uptime_seconds,
            hostscan_scrape_count_total,
        }))
    }

    pub fn update_from_statistics(&self, stats: &Statistics) {
        self.hostscan_results_count.set(stats.count as f64);
        self.hostscan_results_bytes.set(stats.total_size as f64);
    }

    pub fn record_scan(&self, created_at_unix: i64) {
        self.hostscan_scans_total.inc();
        self.hostscan_last_scan_timestamp_seconds
            .set(created_at_unix as f64);
    }

    pub fn inc_scan_failure(&self, kind: &str) {
        self.hostscan_scan_failures_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn inc_store_op(&self, op: &str) {
        self.hostscan_store_operations_total
            .with_label_values(&[op])
            .inc();
    }

    pub fn inc_api_error(&self, kind: &str) {
        self.hostscan_api_errors_total
            .with_label_values(&[kind])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.hostscan_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let uptime = now_unix().saturating_sub(self.started_at_unix) as f64;
        self.hostscan_uptime_seconds.set(uptime);

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registered_families() {
        let metrics = Metrics::new().expect("инициализация метрик");
        metrics.record_scan(1_700_000_000);
        metrics.inc_store_op("load");
        metrics.inc_api_error("not_found");
        metrics.update_from_statistics(&Statistics {
            count: 3,
            total_size: 4096,
            storage_root: "/tmp/results".to_string(),
        });

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("hostscan_scans_total 1"));
        assert!(text.contains("hostscan_results_count 3"));
        assert!(text.contains("hostscan_results_bytes 4096"));
        assert!(text.contains("hostscan_store_operations_total{op=\"load\"} 1"));
        assert!(text.contains("hostscan_api_errors_total{kind=\"not_found\"} 1"));
        assert!(text.contains("hostscan_uptime_seconds"));
    }
}
