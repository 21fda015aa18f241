//! Tracing subscriber initialization with structured logging and optional
//! OpenTelemetry trace export.
//!
//! Log output goes to stderr so `--json` command output on stdout stays
//! machine-readable.
//!
//! # Usage
//!
//! ```no_run
//! // Plain structured logging, filter from RUST_LOG
//! skillgate_observe::tracing_setup::init_tracing(false, false).unwrap();
//!
//! // JSON lines with OpenTelemetry export to stdout
//! skillgate_observe::tracing_setup::init_tracing(true, true).unwrap();
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use std::sync::OnceLock;

/// Stores the OTel tracer provider so it can be shut down cleanly on exit.
static TRACER_PROVIDER: OnceLock<SdkTracerProvider> = OnceLock::new();

/// Initialize the global tracing subscriber, filtered by `RUST_LOG`
/// (default `warn`).
pub fn init_tracing(json: bool, enable_otel: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    init_tracing_with_filter(filter, json, enable_otel)
}

/// Initialize the global tracing subscriber with an explicit filter.
///
/// - Installs a `fmt` layer: JSON lines when `json` is true, otherwise
///   human-readable with span close timing.
/// - When `enable_otel` is true, additionally bridges tracing spans to
///   OpenTelemetry using a stdout exporter.
///
/// # Errors
///
/// Returns an error if the global subscriber has already been set.
pub fn init_tracing_with_filter(
    filter: EnvFilter,
    json: bool,
    enable_otel: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (plain_layer, json_layer) = if json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr);
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_writer(std::io::stderr);
        (Some(layer), None)
    };

    let otel_layer = if enable_otel {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
            .build();
        let tracer = provider.tracer("skillgate");

        // Store the provider for shutdown and register it globally.
        let _ = TRACER_PROVIDER.set(provider.clone());
        opentelemetry::global::set_tracer_provider(provider);
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain_layer)
        .with(json_layer)
        .with(otel_layer)
        .try_init()?;

    Ok(())
}

/// Flush pending traces and shut down the OpenTelemetry tracer provider.
///
/// Safe to call even when OTel was not enabled (no-op in that case).
pub fn shutdown_tracing() {
    if let Some(provider) = TRACER_PROVIDER.get()
        && let Err(e) = provider.shutdown()
    {
        eprintln!("Warning: OTel tracer provider shutdown error: {e}");
    }
}
