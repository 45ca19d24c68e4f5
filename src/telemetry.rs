//! Tracing setup for the process hosting the dashboard.
//!
//! The UI process calls [`init_telemetry`] once at startup and
//! [`shutdown_telemetry`] on the way out. Console logging is always on;
//! when `OTEL_EXPORTER_OTLP_ENDPOINT` is set, spans are additionally
//! exported over OTLP so warehouse round-trips show up in traces.

use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Install the global tracing subscriber, with OTLP export when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// `RUST_LOG` filters as usual; without it, the crate logs at info so
/// cache hits and query timings are visible. Fails if a subscriber is
/// already installed, so hosts that configure their own tracing can just
/// skip this.
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,martdash=info"));
    let fmt_layer = tracing_subscriber::fmt::layer();

    let otel_layer = match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_tonic()
                .with_endpoint(&endpoint)
                .build()?;
            let tracer_provider = SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .build();

            // Keep the provider so shutdown can flush pending spans
            let _ = TRACER_PROVIDER.set(tracer_provider.clone());

            let tracer = tracer_provider.tracer("martdash");
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        Err(_) => None,
    };
    let otlp_enabled = otel_layer.is_some();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;

    if otlp_enabled {
        tracing::info!("OpenTelemetry OTLP export enabled");
    }

    Ok(())
}

/// Flush and shut down the OTLP exporter, if one was started.
pub fn shutdown_telemetry() {
    if let Some(provider) = TRACER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            eprintln!("Error shutting down tracer provider: {:?}", e);
        }
    }
}
