use std::fmt;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::{JsonFields, Writer};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields, MakeWriter};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogLevel;

pub const KEY_COMPONENT_TYPE: &str = "component_type";
pub const KEY_COMPONENT_NAME: &str = "component_name";
pub const KEY_INSTANCE_ID: &str = "instance_id";
pub const KEY_SDK_VERSION: &str = "sdk_version";
pub const KEY_STEP: &str = "step";
pub const KEY_NUM_RAW_FINDINGS: &str = "num_raw_findings";
pub const KEY_NUM_PARSED_FINDINGS: &str = "num_parsed_findings";
pub const KEY_NUM_ENRICHED_FINDINGS: &str = "num_enriched_findings";
pub const KEY_NUM_FILTERED_FINDINGS: &str = "num_filtered_findings";
pub const KEY_ERROR: &str = "error";
pub const KEY_RAW_FINDING: &str = "raw_finding";
pub const KEY_PANIC_STACK_TRACE: &str = "panic_stack_trace";

/// Dependencies that are chatty at debug level.
const QUIET_DEPENDENCIES: &str = "sqlx=warn,hyper=warn,hyper_util=warn,reqwest=warn";

/// Installs the JSON-to-stderr subscriber used by every component.
///
/// `RUST_LOG` takes precedence over `level` when set. Calling this more than
/// once is harmless: only the first subscriber sticks.
pub fn try_init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},{QUIET_DEPENDENCIES}")));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer(std::io::stderr))
        .try_init();
}

/// One JSON object per line. Fields of every enclosing span are merged into
/// the record next to the event's own fields, so run keys are top-level.
pub fn layer<S, W>(make_writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .fmt_fields(JsonFields::new())
        .event_format(FlatJson)
        .with_writer(make_writer)
}

struct FlatJson;

impl<S, N> FormatEvent<S, N> for FlatJson
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'w> FormatFields<'w> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut record = Map::new();
        record.insert(
            "timestamp".into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        record.insert(
            "level".into(),
            Value::String(event.metadata().level().to_string()),
        );

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                let Some(fields) = extensions.get::<FormattedFields<N>>() else {
                    continue;
                };
                if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(fields) {
                    record.extend(fields);
                }
            }
        }

        event.record(&mut FieldVisitor(&mut record));
        writeln!(writer, "{}", Value::Object(record))
    }
}

struct FieldVisitor<'a>(&'a mut Map<String, Value>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().into(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().into(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().into(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().into(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().into(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0
            .insert(field.name().into(), Value::String(format!("{value:?}")));
    }
}
