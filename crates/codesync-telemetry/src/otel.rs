//! OTLP tracing layer and sampling.

use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
    TracerProvider as _,
};
use opentelemetry::{Context, KeyValue, global};
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracer, SdkTracerProvider, ShouldSample};
use tracing_opentelemetry::OpenTelemetryLayer;

use crate::TelemetryError;

/// Flushes and shuts down the tracer provider on drop.
pub struct OtelGuard {
    provider: SdkTracerProvider,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("OTel shutdown error: {e}");
        }
    }
}

/// Build the OTLP layer for `tracing_subscriber::registry()`.
///
/// Must be called from inside a Tokio runtime: the batch exporter spawns onto
/// it. Keep the guard alive until exit.
pub fn otel_layer<S>(
    service_name: &str,
) -> Result<(OpenTelemetryLayer<S, SdkTracer>, OtelGuard), TelemetryError>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let exporter = SpanExporter::builder()
        .with_tonic()
        .build()
        .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(CodeSyncSampler)
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());

    let tracer = provider.tracer("codesync");
    let layer = tracing_opentelemetry::layer().with_tracer(tracer);
    Ok((layer, OtelGuard { provider }))
}

/// Sampling rate for a root span of the given name.
///
/// | Spans                                   | Rate |
/// |-----------------------------------------|------|
/// | assistant flows, simulator runs         | 100% |
/// | `presence*` (heartbeat chatter)         |   1% |
/// | everything else                         |  10% |
fn sample_rate(name: &str) -> f64 {
    match name {
        "suggest" | "execute" | "debug" | "translate" | "simulate" => 1.0,
        _ if name.starts_with("presence") => 0.01,
        _ => 0.1,
    }
}

/// Keeps sampled traces whole, always keeps errors, otherwise samples by
/// [`sample_rate`].
#[derive(Debug, Clone)]
struct CodeSyncSampler;

impl ShouldSample for CodeSyncSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        if let Some(cx) = parent_context {
            let parent = cx.span();
            let parent = parent.span_context();
            if parent.is_sampled() {
                return SamplingResult {
                    decision: SamplingDecision::RecordAndSample,
                    attributes: vec![],
                    trace_state: parent.trace_state().clone(),
                };
            }
        }

        let is_error = attributes.iter().any(|kv| {
            kv.key.as_str() == "otel.status_code" && kv.value.as_str() == "ERROR"
        });
        if is_error {
            return SamplingResult {
                decision: SamplingDecision::RecordAndSample,
                attributes: vec![],
                trace_state: TraceState::default(),
            };
        }

        Sampler::TraceIdRatioBased(sample_rate(name)).should_sample(
            parent_context,
            trace_id,
            name,
            span_kind,
            attributes,
            links,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rates() {
        assert_eq!(sample_rate("translate"), 1.0);
        assert_eq!(sample_rate("presence_heartbeat"), 0.01);
        assert_eq!(sample_rate("publish"), 0.1);
    }
}
