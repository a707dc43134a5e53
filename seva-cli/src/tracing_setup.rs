//! Tracing setup for the seva binary
//!
//! Console output always; per-level append-only files when a log directory
//! is configured; OTLP export with the `telemetry` feature and `--otel`.
//!
//! Environment variables:
//!   RUST_LOG                          # Console filter (default: info)
//!   SEVA_LOG_DIR                      # Enables info/warning/error/security.log
//!   OTEL_EXPORTER_OTLP_ENDPOINT       # OTLP endpoint (default: http://localhost:4317)
//!   OTEL_SERVICE_NAME                 # Service name (default: seva)

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing::Level;
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Target used by the server for allowlist, rate-limit and auth events.
pub const SECURITY_TARGET: &str = "seva::security";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

#[derive(Debug, Clone, Default)]
pub struct TracingConfig {
    /// Debug console output unless RUST_LOG says otherwise
    pub debug: bool,
    /// Export spans over OTLP (needs the telemetry feature)
    pub otel: bool,
    pub log_dir: Option<PathBuf>,
}

fn console_filter(debug: bool) -> EnvFilter {
    let default = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

fn log_file_layer<F>(dir: &Path, name: &str, keep: F) -> Result<BoxedLayer>
where
    F: Fn(&tracing::Metadata<'_>) -> bool + Send + Sync + 'static,
{
    let path = dir.join(name);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    Ok(tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_filter(filter_fn(keep))
        .boxed())
}

/// One layer per log file, each with its own filter.
pub fn file_layers(dir: &Path) -> Result<Vec<BoxedLayer>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    Ok(vec![
        log_file_layer(dir, "info.log", |m| m.is_event() && *m.level() == Level::INFO)?,
        log_file_layer(dir, "warning.log", |m| m.is_event() && *m.level() == Level::WARN)?,
        log_file_layer(dir, "error.log", |m| m.is_event() && *m.level() == Level::ERROR)?,
        log_file_layer(dir, "security.log", |m| m.is_event() && m.target() == SECURITY_TARGET)?,
    ])
}

/// Install the global subscriber.
pub fn init(config: &TracingConfig) -> Result<()> {
    let files = match &config.log_dir {
        Some(dir) => file_layers(dir)?,
        None => Vec::new(),
    };
    let console = tracing_subscriber::fmt::layer()
        .with_target(config.debug)
        .compact()
        .with_filter(console_filter(config.debug));

    let registry = tracing_subscriber::registry().with(files).with(console);

    #[cfg(feature = "telemetry")]
    if config.otel {
        use opentelemetry::trace::TracerProvider as _;
        use opentelemetry::KeyValue;
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::trace::TracerProvider;

        let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:4317".to_string());
        let service_name = std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "seva".to_string());

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&endpoint)
            .build()
            .map_err(|e| anyhow!("Failed to create OTLP exporter: {}", e))?;

        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_resource(opentelemetry_sdk::Resource::new(vec![KeyValue::new(
                "service.name",
                service_name.clone(),
            )]))
            .build();
        let tracer = provider.tracer("seva");
        // dropping the provider stops export
        let _ = opentelemetry::global::set_tracer_provider(provider);

        registry
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .try_init()
            .map_err(|err| anyhow!(err))?;

        tracing::info!(endpoint = %endpoint, service = %service_name, "OpenTelemetry tracing initialized");
        return Ok(());
    }

    #[cfg(not(feature = "telemetry"))]
    if config.otel {
        eprintln!("--otel ignored: built without the telemetry feature");
    }

    registry.try_init().map_err(|err| anyhow!(err))
}

/// Flush pending spans.
#[cfg(feature = "telemetry")]
pub fn shutdown_otel() {
    opentelemetry::global::shutdown_tracer_provider();
}

#[cfg(not(feature = "telemetry"))]
pub fn shutdown_otel() {}
