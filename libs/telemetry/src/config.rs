use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtlpProtocol {
    Grpc,
    HttpProtobuf,
}

/// Logging and export settings, read from the environment.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    /// `EnvFilter` directives; `RUST_LOG` wins when set.
    pub filter: String,
    pub json_logs: bool,
    pub otlp_endpoint: String,
    pub otlp_protocol: OtlpProtocol,
    pub otel_enabled: bool,
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
            filter: "info".into(),
            json_logs: false,
            otlp_endpoint: String::new(),
            otlp_protocol: OtlpProtocol::Grpc,
            otel_enabled: false,
        }
    }

    /// Reads `RUST_LOG`, `LOG_FORMAT` (`json` or `text`), `OTEL_SERVICE_NAME`,
    /// `ENABLE_OTEL`, `OTEL_EXPORTER_OTLP_ENDPOINT` and `OTEL_EXPORTER_OTLP_PROTOCOL`.
    pub fn from_env(default_service_name: &str, default_service_version: &str) -> Self {
        let service_name =
            env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| default_service_name.to_string());
        let mut cfg = Self::new(service_name, default_service_version);
        if let Ok(filter) = env::var("RUST_LOG")
            && !filter.trim().is_empty()
        {
            cfg.filter = filter;
        }
        cfg.json_logs = env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        cfg.otlp_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT").unwrap_or_default();
        cfg.otlp_protocol = env::var("OTEL_EXPORTER_OTLP_PROTOCOL")
            .map(|v| match v.to_lowercase().as_str() {
                "http" | "http/protobuf" => OtlpProtocol::HttpProtobuf,
                _ => OtlpProtocol::Grpc,
            })
            .unwrap_or(OtlpProtocol::Grpc);
        cfg.otel_enabled = env::var("ENABLE_OTEL")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);
        cfg
    }

    pub fn exporter_enabled(&self) -> bool {
        self.otel_enabled && !self.otlp_endpoint.trim().is_empty()
    }
}
