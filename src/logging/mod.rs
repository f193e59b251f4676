//! Tracing and logging setup.
//!
//! Call [`setup_tracing`] once at startup, before the first backup run is scheduled.
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `RUST_LOG` | Console log filter (e.g. `info`, `xdr_archiver=debug`) | `info` |
//! | `RUST_TRACE` | OpenTelemetry trace filter | `debug` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP endpoint URL | (required for OTel) |
//!
//! Without `pretty_logs`, every line is a single record suitable for log aggregation,
//! carrying the span context of the run, customer and record being processed:
//! ```text
//! 2024-03-02T00:00:05.120Z ERROR xdr_archiver::backup: Failed to export record: Failed to upload '4821/2024-03-01/recording_555.wav', keeping it staged: ... [backup{now=2024-03-02 00:00:00 UTC}][customer{customer=4821}][record{i_xdr=555}]
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[cfg(feature = "pretty_logs")]
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(not(feature = "pretty_logs"))]
mod production;

#[cfg(feature = "pretty_logs")]
mod pretty;

#[cfg(feature = "open_telemetry")]
mod otel;

/// Initializes the tracing subscriber with console output and optional OpenTelemetry.
///
/// Falls back to console-only logging if the OTLP exporter cannot be set up.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
#[cfg(feature = "open_telemetry")]
pub fn setup_tracing() {
    let console_layer = setup_console_layer();

    match otel::setup_open_telemetry_layer() {
        Ok(otlp_layer) => {
            Registry::default()
                .with(console_layer)
                .with(otlp_layer)
                .init();

            tracing::info!(
                app = crate::APP_NAME.as_str(),
                version = crate::APP_VERSION.as_str(),
                "Tracing initialized [console + OpenTelemetry]"
            );
        }
        Err(err) => {
            Registry::default().with(console_layer).init();
            tracing::info!(
                app = crate::APP_NAME.as_str(),
                version = crate::APP_VERSION.as_str(),
                "Tracing initialized [console only]"
            );
            tracing::warn!("Skipping OpenTelemetry setup: {:#}", err);
        }
    }
}

/// Initializes the tracing subscriber with console output only.
#[cfg(not(feature = "open_telemetry"))]
pub fn setup_tracing() {
    let console_layer = setup_console_layer();
    Registry::default().with(console_layer).init();
    tracing::info!(
        app = crate::APP_NAME.as_str(),
        version = crate::APP_VERSION.as_str(),
        "Tracing initialized [console only]"
    );
}

fn console_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(feature = "pretty_logs")]
fn setup_console_layer() -> Box<dyn Layer<Registry> + Send + Sync + 'static> {
    tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW)
        .event_format(pretty::PrettyConsoleLogFormat)
        .with_filter(console_filter())
        .boxed()
}

#[cfg(not(feature = "pretty_logs"))]
fn setup_console_layer() -> Box<dyn Layer<Registry> + Send + Sync + 'static> {
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .event_format(production::ProductionLogFormat)
        .with_filter(console_filter())
        .boxed()
}
