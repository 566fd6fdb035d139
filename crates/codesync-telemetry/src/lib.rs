//! OpenTelemetry export for CodeSync.
//!
//! Binaries own their `tracing_subscriber` stack (an `EnvFilter` plus an
//! stderr `fmt` layer). With the `telemetry` feature this crate adds an OTLP
//! span-export layer to that stack.
//!
//! # Activation
//!
//! Export activates only when the standard OTel environment variables ask for
//! it:
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 codesync simulate
//! ```
//!
//! `OTEL_SDK_DISABLED=true` wins over everything else.

#[cfg(feature = "telemetry")]
mod otel;

#[cfg(feature = "telemetry")]
pub use otel::{OtelGuard, otel_layer};

/// Errors setting up span export.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("failed to build OTLP exporter: {0}")]
    Exporter(String),
}

/// Whether the environment asks for OTel export.
pub fn otel_enabled() -> bool {
    otel_enabled_with(|key| std::env::var(key).ok())
}

fn otel_enabled_with(var: impl Fn(&str) -> Option<String>) -> bool {
    if var("OTEL_SDK_DISABLED").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        return false;
    }
    if var("OTEL_EXPORTER_OTLP_ENDPOINT").is_some() {
        return true;
    }
    var("OTEL_TRACES_EXPORTER").is_some_and(|exporter| !exporter.eq_ignore_ascii_case("none"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn enabled(vars: &[(&str, &str)]) -> bool {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        otel_enabled_with(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_otel_enabled_rules() {
        assert!(!enabled(&[]));
        assert!(enabled(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317")]));
        assert!(enabled(&[("OTEL_TRACES_EXPORTER", "otlp")]));
        assert!(!enabled(&[("OTEL_TRACES_EXPORTER", "none")]));
        assert!(!enabled(&[
            ("OTEL_SDK_DISABLED", "TRUE"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://localhost:4317"),
        ]));
    }
}
