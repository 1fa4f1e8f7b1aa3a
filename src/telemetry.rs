//! Telemetry setup for tailnet-dns.
//!
//! Supports:
//! - Tracing with configurable log levels
//! - Prometheus metrics endpoint (with `prometheus` feature)
//! - OpenTelemetry tracing export (with `otel` feature)

#[cfg(feature = "prometheus")]
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "otel")]
use crate::config::OpenTelemetryConfig;
use crate::config::TelemetryConfig;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(feature = "otel")]
use std::sync::OnceLock;
#[cfg(feature = "otel")]
static TRACER_PROVIDER: OnceLock<opentelemetry_sdk::trace::SdkTracerProvider> = OnceLock::new();

/// Initialize telemetry (tracing, metrics, optional OTLP).
pub fn init(config: &TelemetryConfig) -> Result<(), BoxError> {
    init_tracing(config)?;

    #[cfg(feature = "prometheus")]
    if let Some(addr) = config.prometheus_addr {
        start_prometheus_exporter(addr)?;
    }

    // Descriptions reach only the recorder installed at call time.
    crate::metrics::describe_metrics();

    info!(
        log_level = %config.log_level,
        prometheus_addr = ?config.prometheus_addr,
        otel = config.opentelemetry.is_some(),
        "telemetry initialized"
    );
    Ok(())
}

fn init_tracing(config: &TelemetryConfig) -> Result<(), BoxError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    #[cfg(feature = "otel")]
    let otel_layer = match &config.opentelemetry {
        Some(otel_config) => {
            use opentelemetry::trace::TracerProvider;

            let provider = build_tracer_provider(otel_config)?;
            let tracer = provider.tracer(otel_config.service_name.clone());
            let _ = TRACER_PROVIDER.set(provider);
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    #[cfg(feature = "otel")]
    let registry = registry.with(otel_layer);

    registry.try_init()?;

    #[cfg(feature = "otel")]
    if let Some(otel_config) = &config.opentelemetry {
        info!(
            endpoint = %otel_config.endpoint,
            service_name = %otel_config.service_name,
            "OpenTelemetry tracing enabled"
        );
    }

    #[cfg(not(feature = "otel"))]
    if config.opentelemetry.is_some() {
        tracing::warn!("telemetry.opentelemetry is set but the otel feature is not compiled in");
    }

    Ok(())
}

/// Build an OTLP span pipeline tagged with the configured service name.
#[cfg(feature = "otel")]
fn build_tracer_provider(
    otel_config: &OpenTelemetryConfig,
) -> Result<opentelemetry_sdk::trace::SdkTracerProvider, BoxError> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk as otlp_sdk;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otel_config.endpoint)
        .build()?;

    let resource = otlp_sdk::Resource::builder()
        .with_attributes([
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                otel_config.service_name.clone(),
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
        ])
        .build();

    Ok(otlp_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

/// Start the Prometheus HTTP exporter with DNS-sized latency buckets.
#[cfg(feature = "prometheus")]
fn start_prometheus_exporter(addr: SocketAddr) -> Result<(), BoxError> {
    use crate::metrics::{QUERY_DURATION, QUERY_DURATION_BUCKETS, RECORDS_RETURNED, RECORDS_RETURNED_BUCKETS};
    use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(QUERY_DURATION.to_string()), QUERY_DURATION_BUCKETS)?
        .set_buckets_for_metric(
            Matcher::Full(RECORDS_RETURNED.to_string()),
            RECORDS_RETURNED_BUCKETS,
        )?
        .install()?;

    info!(%addr, "Prometheus metrics exporter started");

    Ok(())
}

/// Shutdown telemetry (flush OTLP spans).
pub fn shutdown() {
    #[cfg(feature = "otel")]
    {
        if let Some(provider) = TRACER_PROVIDER.get() {
            if let Err(e) = provider.shutdown() {
                tracing::warn!("Error shutting down tracer provider: {}", e);
            }
        }
    }
}
