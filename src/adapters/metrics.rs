use prometheus::{Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

pub struct MetricsCollector {
    registry: Registry,

    // Matching
    pub matches_total: CounterVec,
    pub stub_hits: CounterVec,

    // Generation and rendering
    pub generation_errors: CounterVec,
    pub render_duration: Histogram,

    // Contract drift
    pub contract_violations: Counter,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let matches_total = CounterVec::new(
            Opts::new("decoy_matches_total", "Match attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(matches_total.clone()))?;

        let stub_hits = CounterVec::new(
            Opts::new("decoy_stub_hits_total", "Responses served per stub"),
            &["stub_id"],
        )?;
        registry.register(Box::new(stub_hits.clone()))?;

        let generation_errors = CounterVec::new(
            Opts::new("decoy_generation_errors_total", "Failed data generation calls"),
            &["kind"],
        )?;
        registry.register(Box::new(generation_errors.clone()))?;

        let render_duration = Histogram::with_opts(HistogramOpts::new(
            "decoy_render_duration_seconds",
            "Response rendering duration in seconds",
        ))?;
        registry.register(Box::new(render_duration.clone()))?;

        let contract_violations = Counter::new(
            "decoy_contract_violations_total",
            "Contract violations found in synthesized responses",
        )?;
        registry.register(Box::new(contract_violations.clone()))?;

        Ok(Self {
            registry,
            matches_total,
            stub_hits,
            generation_errors,
            render_duration,
            contract_violations,
        })
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        assert!(MetricsCollector::new().is_ok());
    }

    #[test]
    fn test_metrics_encoding() {
        let collector = MetricsCollector::new().unwrap();

        collector.matches_total.with_label_values(&["matched"]).inc();
        collector.stub_hits.with_label_values(&["login"]).inc();
        collector.contract_violations.inc_by(2.0);

        let metrics_text = collector.encode().unwrap();
        assert!(metrics_text.contains("decoy_matches_total{outcome=\"matched\"} 1"));
        assert!(metrics_text.contains("decoy_stub_hits_total"));
        assert!(metrics_text.contains("decoy_contract_violations_total 2"));
    }
}
