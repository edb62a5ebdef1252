//! Tracing setup and HTTP span shaping.
//!
//! Logs always go to stdout through `tracing-subscriber`. When an OTLP
//! endpoint is configured via the standard `OTEL_EXPORTER_OTLP_*` variables,
//! spans are additionally exported through OpenTelemetry. The gate records
//! no custom metrics, so no meter pipeline is installed.

use axum::http::{Request, Response};
use opentelemetry::KeyValue;
use opentelemetry::trace::{Status, TracerProvider};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler, SdkTracerProvider};
use opentelemetry_semantic_conventions::{SCHEMA_URL, attribute::SERVICE_VERSION};
use std::env;
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultOnRequest, MakeSpan, OnResponse, TraceLayer};
use tracing::Span;
use tracing_opentelemetry::{OpenTelemetryLayer, OpenTelemetrySpanExt};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// OTLP transport, selected by `OTEL_EXPORTER_OTLP_PROTOCOL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OtlpProtocol {
    HttpProtobuf,
    Grpc,
}

impl OtlpProtocol {
    /// Export is enabled when any of the standard OTLP variables is set.
    /// Unknown protocol values fall back to `http/protobuf`.
    fn detect() -> Option<Self> {
        let enabled = [
            "OTEL_EXPORTER_OTLP_ENDPOINT",
            "OTEL_EXPORTER_OTLP_HEADERS",
            "OTEL_EXPORTER_OTLP_PROTOCOL",
        ]
        .iter()
        .any(|name| env::var(name).is_ok());
        if !enabled {
            return None;
        }
        match env::var("OTEL_EXPORTER_OTLP_PROTOCOL").as_deref() {
            Ok("grpc") => Some(OtlpProtocol::Grpc),
            _ => Some(OtlpProtocol::HttpProtobuf),
        }
    }
}

/// Service identity attached to every exported span.
///
/// `OTEL_SERVICE_NAME` overrides the name passed by the caller.
fn service_resource(name: &str, version: &str) -> Resource {
    let name = env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| name.to_string());
    Resource::builder()
        .with_service_name(name)
        .with_schema_url(
            [KeyValue::new(SERVICE_VERSION, version.to_string())],
            SCHEMA_URL,
        )
        .build()
}

fn span_exporter(protocol: OtlpProtocol) -> opentelemetry_otlp::SpanExporter {
    let builder = opentelemetry_otlp::SpanExporter::builder();
    match protocol {
        OtlpProtocol::HttpProtobuf => builder.with_http().build(),
        OtlpProtocol::Grpc => builder.with_tonic().build(),
    }
    .expect("Failed to build OTLP span exporter")
}

/// Flushes the span exporter when dropped at process exit.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take() {
            if let Err(err) = provider.shutdown() {
                eprintln!("{err:?}");
            }
        }
    }
}

/// Installs the global tracing subscriber and, when configured through the
/// environment, the OTLP span exporter.
pub fn init(service_name: &str, service_version: &str) -> TelemetryGuard {
    match OtlpProtocol::detect() {
        Some(protocol) => {
            let fmt = tracing_subscriber::fmt::layer();
            let provider = SdkTracerProvider::builder()
                .with_sampler(Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                    1.0,
                ))))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(service_resource(service_name, service_version))
                .with_batch_exporter(span_exporter(protocol))
                .build();
            let tracer = provider.tracer("hubgate");
            tracing_subscriber::registry()
                // Cap at INFO so the exporter's own network stack cannot
                // reenter the OTLP layer with its spans while exporting.
                .with(tracing_subscriber::filter::LevelFilter::INFO)
                .with(fmt)
                .with(OpenTelemetryLayer::new(tracer))
                .init();
            tracing::info!("OTLP span export enabled via {:?}", protocol);
            TelemetryGuard {
                tracer_provider: Some(provider),
            }
        }
        None => {
            let fmt = tracing_subscriber::fmt::layer();
            tracing_subscriber::registry()
                .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
                .with(fmt)
                .init();
            TelemetryGuard {
                tracer_provider: None,
            }
        }
    }
}

/// Axum trace layer naming spans after method and path.
pub fn http_tracing() -> TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    GateHttpMakeSpan,
    DefaultOnRequest,
    GateHttpOnResponse,
> {
    TraceLayer::new_for_http()
        .make_span_with(GateHttpMakeSpan)
        .on_response(GateHttpOnResponse)
}

#[derive(Clone, Debug)]
pub struct GateHttpMakeSpan;

impl<B> MakeSpan<B> for GateHttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::info_span!(
            "http_request",
            otel.kind = "server",
            otel.name = %format!("{} {}", request.method(), request.uri().path()),
            method = %request.method(),
            uri = %request.uri(),
        )
    }
}

#[derive(Clone, Debug)]
pub struct GateHttpOnResponse;

impl<B> OnResponse<B> for GateHttpOnResponse {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        let status = response.status();
        if status.is_success() {
            span.set_status(Status::Ok);
        } else {
            span.set_status(Status::error(
                status.canonical_reason().unwrap_or("unknown").to_string(),
            ));
        }
        tracing::info!(
            "status={} elapsed={}ms",
            status.as_u16(),
            latency.as_millis()
        );
    }
}
