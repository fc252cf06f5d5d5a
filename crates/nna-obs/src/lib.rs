//! Observability shared by the vehicle bridge services: one-JSON-object-per-line
//! logging, request id propagation, health routes and Prometheus metrics.

use std::fmt;
use std::io;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing_subscriber::{
    fmt::{self as tsfmt, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter},
    layer::{Context, Layer, SubscriberExt},
    registry::LookupSpan,
    EnvFilter, Registry,
};

mod metrics;

pub use metrics::{
    encode_prometheus, entity_updates_total, handler_latency_seconds, http_requests_total,
    register_counter, register_histogram, service_name, webhook_events_total, CounterVec,
    HistogramVec, DEFAULT_BUCKETS, PROMETHEUS_CONTENT_TYPE,
};

/// Span field carrying the request id. Declare it as `tracing::field::Empty`
/// and fill it with [`SpanExt::with_req`].
pub const REQUEST_ID_FIELD: &str = "request_id";

#[derive(Debug, thiserror::Error)]
pub enum ObsInitError {
    #[error("tracing subscriber already initialized")]
    AlreadyInitialized,
    #[error("failed to install tracing subscriber: {0}")]
    Install(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Initialize observability for a service.
pub struct ObsInit;

impl ObsInit {
    /// Install the global subscriber writing JSON lines to stderr and register
    /// the service with the metrics registry.
    pub fn init(service: &str) -> Result<(), ObsInitError> {
        let subscriber = Self::subscriber_with_writer(service, io::stderr);
        tracing::subscriber::set_global_default(subscriber).map_err(|err| {
            if tracing::dispatcher::has_been_set() {
                ObsInitError::AlreadyInitialized
            } else {
                ObsInitError::Install(err)
            }
        })
    }

    /// Build a subscriber using the provided writer. `RUST_LOG` wins over
    /// `LOG_LEVEL`; debug builds default to `debug`.
    pub fn subscriber_with_writer<W>(
        service: &str,
        writer: W,
    ) -> impl tracing::Subscriber + Send + Sync + 'static
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        metrics::init(service);
        let fallback_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(fallback_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = tsfmt::layer()
            .with_ansi(false)
            .event_format(JsonLineFormat {
                service: Arc::from(service),
            })
            .with_writer(writer);

        Registry::default()
            .with(env_filter)
            .with(RequestIdLayer)
            .with(fmt_layer)
    }
}

/// Build a simple health and info router for services.
pub fn health_router(service: &'static str) -> Router {
    let health = get(move || async move { Json(json!({ "status": "ok", "service": service })) });
    let info = get(move || async move {
        Json(json!({ "service": service, "version": env!("CARGO_PKG_VERSION") }))
    });

    Router::new()
        .route("/health", health.clone())
        .route("/v1/health", health)
        .route("/info", info.clone())
        .route("/v1/info", info)
}

/// Helper trait for request scoped metadata.
pub trait SpanExt {
    /// Record a request identifier on the span so that every event inside it
    /// carries the id.
    fn with_req(&self, request_id: &str);
}

impl SpanExt for tracing::Span {
    fn with_req(&self, request_id: &str) {
        self.record(REQUEST_ID_FIELD, request_id);
    }
}

#[derive(Clone)]
struct RequestId(String);

struct RequestIdLayer;

impl RequestIdLayer {
    fn store<S>(id: &Id, request_id: Option<String>, ctx: &Context<'_, S>)
    where
        S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    {
        if let (Some(request_id), Some(span)) = (request_id, ctx.span(id)) {
            span.extensions_mut().replace(RequestId(request_id));
        }
    }
}

impl<S> Layer<S> for RequestIdLayer
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = RequestIdVisitor::default();
        attrs.record(&mut visitor);
        Self::store(id, visitor.0, &ctx);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let mut visitor = RequestIdVisitor::default();
        values.record(&mut visitor);
        Self::store(id, visitor.0, &ctx);
    }
}

#[derive(Default)]
struct RequestIdVisitor(Option<String>);

impl Visit for RequestIdVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == REQUEST_ID_FIELD {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == REQUEST_ID_FIELD {
            self.0 = Some(format!("{:?}", value));
        }
    }
}

struct JsonLineFormat {
    service: Arc<str>,
}

impl<S, N> FormatEvent<S, N> for JsonLineFormat
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let mut fields = FieldsVisitor::default();
        event.record(&mut fields);

        let request_id = ctx.lookup_current().and_then(|span| {
            for scope in span.scope() {
                if let Some(id) = scope.extensions().get::<RequestId>() {
                    return Some(id.clone());
                }
            }
            None
        });

        let mut line = Map::new();
        line.insert(
            "level".into(),
            Value::String(metadata.level().as_str().to_ascii_lowercase()),
        );
        line.insert("target".into(), Value::String(metadata.target().to_string()));
        line.insert("service".into(), Value::String(self.service.to_string()));
        line.insert(
            REQUEST_ID_FIELD.into(),
            request_id.map_or(Value::Null, |id| Value::String(id.0)),
        );
        line.insert("fields".into(), Value::Object(fields.0));

        let encoded = serde_json::to_string(&Value::Object(line)).map_err(|_| fmt::Error)?;
        writeln!(writer, "{encoded}")
    }
}

#[derive(Default)]
struct FieldsVisitor(Map<String, Value>);

impl Visit for FieldsVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().to_string(), Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0
            .insert(field.name().to_string(), Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.0.insert(field.name().to_string(), value);
    }
}
