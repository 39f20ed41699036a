//! Logging, metrics and transcript helpers shared by Relay services.

use anyhow::Result;

pub mod config;
mod context;
pub mod metrics;
mod tracing_init;
mod transcript;

pub use config::{OtlpProtocol, TelemetryConfig};
pub use context::TelemetryLabels;
pub use crate::metrics::{
    REJECTED_CALLERS_TOTAL, TURN_DURATION_SECONDS, TURN_ERRORS_TOTAL, TURNS_TOTAL,
    record_counter, record_histogram, with_common_fields,
};
pub use tracing_init::{init_telemetry, telemetry_enabled};
pub use transcript::{
    MemoryTranscriptStore, TracingTranscriptLogger, TranscriptDirection, TranscriptLogger,
    TranscriptLoggerMiddleware,
};

/// Installs the global subscriber configured from the environment (`RUST_LOG`, `LOG_FORMAT`,
/// `ENABLE_OTEL`, `OTEL_EXPORTER_OTLP_ENDPOINT`).
pub fn install(service_name: &str) -> Result<()> {
    init_telemetry(&TelemetryConfig::from_env(
        service_name,
        env!("CARGO_PKG_VERSION"),
    ))
}

#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr, $labels:expr) => {{
        $crate::metrics::record_counter($name, $value, $labels)
    }};
}

#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr, $labels:expr) => {{
        $crate::metrics::record_histogram($name, $value, $labels)
    }};
}
