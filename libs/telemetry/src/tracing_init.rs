use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tracing::warn;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::TelemetryConfig;

static INIT: OnceLock<()> = OnceLock::new();
static EXPORTING: AtomicBool = AtomicBool::new(false);

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global subscriber once; later calls only refresh the exporter flag.
pub fn init_telemetry(cfg: &TelemetryConfig) -> Result<()> {
    if INIT.get().is_some() {
        EXPORTING.store(cfg.exporter_enabled(), Ordering::SeqCst);
        return Ok(());
    }

    let filter = EnvFilter::try_new(&cfg.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer: BoxedLayer = if cfg.json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let exporter = if cfg.exporter_enabled() {
        otel::layer(cfg)?
    } else {
        None
    };
    let exporting = exporter.is_some();
    let mut layers = vec![fmt_layer];
    layers.extend(exporter);

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .ok();
    EXPORTING.store(exporting, Ordering::SeqCst);
    INIT.set(()).ok();
    if cfg.exporter_enabled() && !exporting {
        warn!(endpoint = %cfg.otlp_endpoint, "otel feature disabled; spans are not exported");
    }
    Ok(())
}

/// Whether spans are exported over OTLP.
pub fn telemetry_enabled() -> bool {
    EXPORTING.load(Ordering::SeqCst)
}

#[cfg(feature = "otel")]
mod otel {
    use anyhow::Result;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::{KeyValue, global};
    use opentelemetry_otlp::{SpanExporter, WithExportConfig};
    use opentelemetry_sdk::Resource;
    use opentelemetry_sdk::propagation::TraceContextPropagator;
    use opentelemetry_sdk::trace::SdkTracerProvider;
    use tracing_opentelemetry::OpenTelemetryLayer;
    use tracing_subscriber::Layer;

    use super::BoxedLayer;
    use crate::config::{OtlpProtocol, TelemetryConfig};

    pub(super) fn layer(cfg: &TelemetryConfig) -> Result<Option<BoxedLayer>> {
        let exporter = match cfg.otlp_protocol {
            OtlpProtocol::Grpc => SpanExporter::builder()
                .with_tonic()
                .with_endpoint(cfg.otlp_endpoint.clone())
                .build()?,
            OtlpProtocol::HttpProtobuf => SpanExporter::builder()
                .with_http()
                .with_endpoint(cfg.otlp_endpoint.clone())
                .build()?,
        };
        let resource = Resource::builder_empty()
            .with_service_name(cfg.service_name.clone())
            .with_attributes([KeyValue::new(
                "service.version",
                cfg.service_version.clone(),
            )])
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(resource)
            .with_batch_exporter(exporter)
            .build();
        let tracer = provider.tracer(cfg.service_name.clone());
        global::set_tracer_provider(provider);
        global::set_text_map_propagator(TraceContextPropagator::new());
        Ok(Some(OpenTelemetryLayer::new(tracer).boxed()))
    }
}

#[cfg(not(feature = "otel"))]
mod otel {
    use anyhow::Result;

    use super::BoxedLayer;
    use crate::config::TelemetryConfig;

    pub(super) fn layer(_cfg: &TelemetryConfig) -> Result<Option<BoxedLayer>> {
        Ok(None)
    }
}
