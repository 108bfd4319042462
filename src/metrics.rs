use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry, opts,
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry,
};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

trait ResultExt<T> {
    fn or_exit(self, context: &str) -> T;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn or_exit(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                eprintln!("failed to initialize metric ({context}): {err}");
                std::process::exit(1);
            }
        }
    }
}

pub static CA_TRUSTED: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge_with_registry!(
        "certdash_ca_trusted",
        "1 root CA trusted, 0 not trusted, -1 unknown",
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static TRUST_PROBE_QUERIES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        opts!(
            "certdash_trust_probe_queries_total",
            "Total trust store queries by store and outcome"
        ),
        &["store", "outcome"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static TRUST_PROBE_ATTEMPTS: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram_with_registry!(
        HistogramOpts::new(
            "certdash_trust_probe_attempts",
            "Attempts needed per trust probe"
        ),
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static CERT_EXPIRY_DAYS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec_with_registry!(
        opts!(
            "certdash_cert_expiry_days",
            "Days until certificate expiration (negative if expired)"
        ),
        &["name"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static CERT_EXPIRY_FALLBACKS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter_with_registry!(
        opts!(
            "certdash_cert_expiry_fallbacks_total",
            "Total expiry resolutions that fell back to the mkcert default validity"
        ),
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static MKCERT_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        opts!(
            "certdash_mkcert_errors_total",
            "Total mkcert invocation errors by operation"
        ),
        &["operation"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static ITERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec_with_registry!(
        opts!("certdash_iterations_total", "Total refresh iterations"),
        &["status"],
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static RUNTIME: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram_with_registry!(
        HistogramOpts::new("certdash_runtime", "refresh latency in seconds"),
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static LAST_SUCCESS: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge_with_registry!(
        "certdash_last_success_timestamp_seconds",
        "Unix timestamp of last successful refresh",
        &REGISTRY
    )
    .or_exit("metric can be created")
});

pub static PANICS_RECOVERED: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter_with_registry!(
        opts!(
            "certdash_panics_recovered_total",
            "Total panics recovered from"
        ),
        &REGISTRY
    )
    .or_exit("metric can be created")
});

/// Encode and return metrics for HTTP export
///
/// # Errors
///
/// Returns an error if metrics encoding fails
pub fn encode_metrics() -> Result<Vec<u8>, String> {
    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();

    prometheus::Encoder::encode(&encoder, &REGISTRY.gather(), &mut buffer)
        .map_err(|e| format!("could not encode custom metrics: {e}"))?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_metrics_initialization() {
        CA_TRUSTED.set(1);
        assert_eq!(CA_TRUSTED.get(), 1);
        CA_TRUSTED.set(-1);
        assert_eq!(CA_TRUSTED.get(), -1);
    }

    #[test]
    fn test_metrics_labels() {
        TRUST_PROBE_QUERIES
            .with_label_values(&["current_user", "hit"])
            .inc();
        TRUST_PROBE_QUERIES
            .with_label_values(&["local_machine", "error"])
            .inc();
        CERT_EXPIRY_DAYS.with_label_values(&["example"]).set(90);
        MKCERT_ERRORS.with_label_values(&["generate"]).inc();
        ITERATIONS_TOTAL.with_label_values(&["success"]).inc();
    }

    #[test]
    fn test_histogram_metrics() {
        RUNTIME.start_timer().observe_duration();
        TRUST_PROBE_ATTEMPTS.observe(3.0);
    }

    #[test]
    fn test_counter_metrics() {
        PANICS_RECOVERED.inc();
        CERT_EXPIRY_FALLBACKS.inc();
    }

    #[test]
    fn test_encode_metrics() {
        PANICS_RECOVERED.inc();

        let result = encode_metrics();
        assert!(result.is_ok());

        let buffer = result.unwrap();
        assert!(!buffer.is_empty());

        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("certdash"));
    }

    #[test]
    fn test_registry() {
        let _ = &*CA_TRUSTED;
        let _ = &*RUNTIME;
        ITERATIONS_TOTAL.with_label_values(&["success"]).inc();

        let metrics = REGISTRY.gather();
        assert!(!metrics.is_empty());

        let metric_names: Vec<String> = metrics.iter().map(|m| m.name().to_string()).collect();
        assert!(metric_names.contains(&"certdash_ca_trusted".to_string()));
        assert!(metric_names.contains(&"certdash_runtime".to_string()));
        assert!(metric_names.contains(&"certdash_iterations_total".to_string()));
    }
}
