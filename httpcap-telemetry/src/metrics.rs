//! ## httpcap-telemetry::metrics
//! **Prometheus counters for the capture pipeline**

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub packets: IntCounter,
    pub pairs_opened: IntCounter,
    pub pairs_aborted: IntCounter,
    pub transactions: IntCounter,
    pub transactions_discarded: IntCounter,
    pub decompression_failures: IntCounter,
    pub reparse_failures: IntCounter,
    /// Request start to response end, microseconds of capture time.
    pub transaction_latency: Histogram,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        let packets = counter("httpcap_packets_total", "Packets read from the capture source")?;
        let pairs_opened = counter("httpcap_pairs_opened_total", "Connections tracked")?;
        let pairs_aborted = counter(
            "httpcap_pairs_aborted_total",
            "Connections abandoned after a framing error, gap or stall",
        )?;
        let transactions = counter("httpcap_transactions_total", "Transactions reconstructed")?;
        let transactions_discarded = counter(
            "httpcap_transactions_discarded_total",
            "Transactions dropped because delivery is disabled",
        )?;
        let decompression_failures = counter(
            "httpcap_decompression_failures_total",
            "Bodies replaced by the decompression-failed marker",
        )?;
        let reparse_failures = counter(
            "httpcap_reparse_failures_total",
            "Reconstructed messages rejected by the standard HTTP parser",
        )?;

        let transaction_latency = Histogram::with_opts(
            HistogramOpts::new(
                "httpcap_transaction_latency_us",
                "Request start to response end",
            )
            .buckets(vec![100.0, 1_000.0, 10_000.0, 100_000.0, 1_000_000.0, 10_000_000.0]),
        )?;
        registry.register(Box::new(transaction_latency.clone()))?;

        Ok(Self {
            registry,
            packets,
            pairs_opened,
            pairs_aborted,
            transactions,
            transactions_discarded,
            decompression_failures,
            reparse_failures,
            transaction_latency,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_exported() {
        let metrics = MetricsRecorder::new().unwrap();
        metrics.transactions.inc();
        metrics.transactions.inc();
        metrics.transaction_latency.observe(250.0);

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("httpcap_transactions_total 2"));
        assert!(text.contains("httpcap_pairs_aborted_total 0"));
        assert!(text.contains("httpcap_transaction_latency_us_count 1"));
    }

    #[test]
    fn recorders_do_not_share_registries() {
        let a = MetricsRecorder::new().unwrap();
        let b = MetricsRecorder::new().unwrap();
        a.packets.inc();
        assert_eq!(b.packets.get(), 0);
    }
}
