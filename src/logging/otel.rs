use crate::{APP_NAME, APP_VERSION};
use anyhow::Context;
use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use std::env;
use tracing::Subscriber;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

/// Builds the OTLP export layer; fails if no endpoint is configured.
pub fn setup_open_telemetry_layer<S>() -> anyhow::Result<impl Layer<S>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .context("No OpenTelemetry endpoint present in OTEL_EXPORTER_OTLP_ENDPOINT")?;

    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .build()
        .with_context(|| format!("Failed to build OpenTelemetry exporter for: {}", endpoint))?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_max_events_per_span(32)
        .with_max_attributes_per_span(16)
        .with_resource(
            Resource::builder_empty()
                .with_attributes([
                    KeyValue::new("service.name", APP_NAME.clone()),
                    KeyValue::new("service.version", APP_VERSION.clone()),
                ])
                .build(),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());

    let tracer = provider.tracer(APP_NAME.clone());
    let filter = EnvFilter::try_from_env("RUST_TRACE").unwrap_or_else(|_| EnvFilter::new("debug"));

    Ok(OpenTelemetryLayer::new(tracer).with_filter(filter))
}
