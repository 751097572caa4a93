// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `tracing` integration.
//!
//! [`InfluxLayer`] turns every `tracing` event at or above the exporter's
//! minimum level into a [`LogEvent`]. The `message` field becomes the
//! message template, every other field becomes a property:
//!
//! ```ignore
//! tracing::info!(target: "checkout", user = "alice", count = 3, "User {{user}} did {{count}} things");
//! ```

use std::error::Error;
use std::fmt;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::event::{ErrorInfo, Level, LogEvent, Value};
use crate::exporter::ExporterHandle;

/// Targets never forwarded: the exporter's own logs and the HTTP stack it
/// uses, which would otherwise feed back into the buffer on every flush.
const IGNORED_TARGETS: &[&str] = &["influxdb_logs", "reqwest", "hyper", "h2", "rustls"];

/// Field holding the error type name when an error is recorded.
const EXCEPTION_TYPE_FIELD: &str = "exception_type";

pub struct InfluxLayer {
    handle: ExporterHandle,
}

impl InfluxLayer {
    #[must_use]
    pub fn new(handle: ExporterHandle) -> Self {
        Self { handle }
    }
}

fn is_ignored(target: &str) -> bool {
    IGNORED_TARGETS.iter().any(|ignored| {
        target
            .strip_prefix(ignored)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
    })
}

impl<S: Subscriber> Layer<S> for InfluxLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_ignored(metadata.target()) {
            return;
        }
        let level = Level::from(metadata.level());
        if level < self.handle.minimum_level() {
            return;
        }

        let mut visitor = EventVisitor::new(level);
        event.record(&mut visitor);
        self.handle.enqueue(visitor.finish());
    }
}

struct EventVisitor {
    event: LogEvent,
    error_message: Option<String>,
    error_type: Option<String>,
}

impl EventVisitor {
    fn new(level: Level) -> Self {
        let mut event = LogEvent::new(level, "");
        event.message_template = None;
        Self {
            event,
            error_message: None,
            error_type: None,
        }
    }

    fn record_value(&mut self, field: &Field, value: Value) {
        match field.name() {
            "message" => self.event.message_template = Some(value.to_string()),
            EXCEPTION_TYPE_FIELD => self.error_type = Some(value.to_string()),
            name => {
                self.event.properties.insert(name.to_string(), value);
            }
        }
    }

    fn finish(mut self) -> LogEvent {
        if let Some(message) = self.error_message {
            let type_name = self.error_type.unwrap_or_else(|| "Error".to_string());
            self.event.error = Some(ErrorInfo::new(type_name, message));
        } else if let Some(type_name) = self.error_type {
            self.event
                .properties
                .insert(EXCEPTION_TYPE_FIELD.to_string(), Value::String(type_name));
        }
        self.event
    }
}

impl Visit for EventVisitor {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, Value::F64(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, Value::I64(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, Value::U64(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, Value::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, Value::from(value));
    }

    fn record_error(&mut self, _field: &Field, value: &(dyn Error + 'static)) {
        self.error_message = Some(value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, Value::String(format!("{value:?}")));
    }
}
