//! Tracing initialisation and bus telemetry for the arbiter.
//!
//! Call [`init_tracing`] once at process startup. Per-tick records and
//! alerts go out through [`emit`], which picks the bus topic from the
//! payload and never blocks.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set the OTLP HTTP exporter is activated. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `ARBITER_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = arbiter_runtime::telemetry::init_tracing("arbiter");
//! ```

use arbiter_middleware::{EventBus, Topic};
use arbiter_types::{Event, EventPayload};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{trace::SdkTracerProvider, Resource};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Source recorded on every event the tick loop publishes.
pub const LOOP_SOURCE: &str = "arbiter-runtime::arbiter_loop";

// ─────────────────────────────────────────────────────────────────────────────
// Subscriber
// ─────────────────────────────────────────────────────────────────────────────

/// Install the global subscriber: `EnvFilter`, compact or JSON output, and an
/// OTLP span exporter when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
///
/// Hold the returned guard for the lifetime of the process; dropping it
/// flushes pending spans. A second call leaves the first subscriber in place.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = std::env::var("ARBITER_LOG_FORMAT").as_deref() == Ok("json");

    let provider = build_provider(service_name, std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok());
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("arbiter")));
    let (json_layer, compact_layer) = if use_json {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer().compact()))
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()
    {
        eprintln!("[arbiter] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

/// Shuts the OTel provider down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[arbiter] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

fn build_provider(service_name: &str, endpoint: Option<String>) -> Option<SdkTracerProvider> {
    let endpoint = endpoint.filter(|e| !e.trim().is_empty())?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[arbiter] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder().with_service_name(service_name.to_string()).build();

    // Simple exporter: the CLI builds its runtime after tracing is up, and a
    // batch exporter would need one at init time.
    Some(SdkTracerProvider::builder().with_resource(resource).with_simple_exporter(exporter).build())
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus telemetry
// ─────────────────────────────────────────────────────────────────────────────

/// Bus topic a payload belongs on.
pub fn topic_for(payload: &EventPayload) -> Topic {
    match payload {
        EventPayload::Tick(_) => Topic::Telemetry,
        EventPayload::Preempted { .. } => Topic::Decisions,
        EventPayload::Rejected(_) | EventPayload::Degradation { .. } | EventPayload::ComponentFault { .. } => {
            Topic::SystemAlerts
        }
    }
}

/// Fire-and-forget publish from the tick loop.
pub fn emit(bus: &EventBus, payload: EventPayload) {
    let topic = topic_for(&payload);
    bus.emit(topic, Event::new(LOOP_SOURCE, payload));
}
