// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mapping of log events to InfluxDB points and line protocol encoding.
//!
//! Every event becomes exactly one point:
//!
//! ```text
//! <source>,hostname=web-1,level=Information,messageTemplate=User\ {user}\ did\ {count}\ things count="3",message="User alice did 3 things",user="alice" 1700000000000000000
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::constants::{
    FIELD_MESSAGE, TAG_EXCEPTION_TYPE, TAG_HOSTNAME, TAG_LEVEL, TAG_MESSAGE_TEMPLATE,
};
use crate::errors::ConfigError;
use crate::event::LogEvent;
use crate::template::{DefaultFormatter, PropertyFormatter};

/// Which clock stamps a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampSource {
    /// The time the event was created.
    #[default]
    Event,
    /// The time the batch is mapped for delivery.
    Delivery,
}

impl std::str::FromStr for TimestampSource {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "event" => Ok(TimestampSource::Event),
            "delivery" | "now" => Ok(TimestampSource::Delivery),
            other => Err(ConfigError::Invalid(format!(
                "unknown timestamp source '{other}', expected 'event' or 'delivery'"
            ))),
        }
    }
}

/// A single time-series record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, String>,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Point {
    /// Appends the line protocol encoding of this point, without a trailing
    /// newline.
    pub fn write_line_protocol(&self, out: &mut String) {
        escape_into(out, &self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            out.push(',');
            escape_into(out, key, &[',', '=', ' ']);
            out.push('=');
            escape_into(out, value, &[',', '=', ' ']);
        }
        let mut separator = ' ';
        for (key, value) in &self.fields {
            out.push(separator);
            separator = ',';
            escape_into(out, key, &[',', '=', ' ']);
            out.push_str("=\"");
            for c in value.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
        let _ = write!(out, " {}", self.timestamp);
    }

    #[must_use]
    pub fn to_line_protocol(&self) -> String {
        let mut out = String::new();
        self.write_line_protocol(&mut out);
        out
    }
}

/// Encodes a batch of points, one per line.
#[must_use]
pub fn encode_batch(points: &[Point]) -> String {
    let mut out = String::with_capacity(points.len() * 256);
    for (i, point) in points.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        point.write_line_protocol(&mut out);
    }
    out
}

// Backslashes are doubled so a value ending in one cannot escape the
// separator that follows it.
fn escape_into(out: &mut String, value: &str, specials: &[char]) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if specials.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn unix_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as i64,
        Err(e) => -(e.duration().as_nanos() as i64),
    }
}

/// Stateless event to point mapping.
#[derive(Clone)]
pub struct PointMapper {
    measurement: String,
    hostname: String,
    formatter: Arc<dyn PropertyFormatter>,
    timestamp_source: TimestampSource,
}

impl std::fmt::Debug for PointMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointMapper")
            .field("measurement", &self.measurement)
            .field("hostname", &self.hostname)
            .field("timestamp_source", &self.timestamp_source)
            .finish_non_exhaustive()
    }
}

impl PointMapper {
    #[must_use]
    pub fn new(
        measurement: impl Into<String>,
        hostname: impl Into<String>,
        formatter: Arc<dyn PropertyFormatter>,
        timestamp_source: TimestampSource,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            hostname: hostname.into(),
            formatter,
            timestamp_source,
        }
    }

    #[must_use]
    pub fn with_defaults(measurement: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self::new(
            measurement,
            hostname,
            Arc::new(DefaultFormatter),
            TimestampSource::default(),
        )
    }

    #[must_use]
    pub fn map(&self, event: &LogEvent) -> Point {
        self.map_at(event, SystemTime::now())
    }

    /// Maps an event, using `now` as the delivery time.
    #[must_use]
    pub fn map_at(&self, event: &LogEvent, now: SystemTime) -> Point {
        let mut tags = BTreeMap::new();
        tags.insert(TAG_LEVEL.to_string(), event.level.to_string());
        tags.insert(TAG_HOSTNAME.to_string(), self.hostname.clone());
        if let Some(error) = &event.error {
            tags.insert(TAG_EXCEPTION_TYPE.to_string(), error.type_name.clone());
        }
        if let Some(template) = &event.message_template {
            tags.insert(TAG_MESSAGE_TEMPLATE.to_string(), template.clone());
        }

        let mut fields: BTreeMap<String, String> = event
            .properties
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        fields.insert(
            FIELD_MESSAGE.to_string(),
            event.render_message(self.formatter.as_ref()),
        );

        let timestamp = match self.timestamp_source {
            TimestampSource::Event => event.timestamp,
            TimestampSource::Delivery => now,
        };

        Point {
            measurement: self.measurement.clone(),
            tags,
            fields,
            timestamp: unix_nanos(timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ErrorInfo, Level, Value};
    use proptest::prelude::*;
    use std::time::Duration;

    fn mapper() -> PointMapper {
        PointMapper::with_defaults("app", "web-1")
    }

    #[test]
    fn test_map_template_example() {
        let event = LogEvent::new(Level::Information, "User {user} did {count} things")
            .with_property("user", "alice")
            .with_property("count", 3);

        let point = mapper().map(&event);

        assert_eq!(point.measurement, "app");
        assert_eq!(point.fields["user"], "alice");
        assert_eq!(point.fields["count"], "3");
        assert_eq!(point.fields["message"], "User alice did 3 things");
        assert_eq!(
            point.tags["messageTemplate"],
            "User {user} did {count} things"
        );
        assert_eq!(point.tags["level"], "Information");
        assert_eq!(point.tags["hostname"], "web-1");
        assert!(!point.tags.contains_key("exceptionType"));
    }

    #[test]
    fn test_map_error_tag() {
        let event = LogEvent::new(Level::Error, "boom")
            .with_error(ErrorInfo::new("TimeoutError", "took too long"));
        let point = mapper().map(&event);
        assert_eq!(point.tags["exceptionType"], "TimeoutError");
        assert_eq!(point.tags["level"], "Error");
    }

    #[test]
    fn test_map_without_template() {
        let mut event = LogEvent::new(Level::Debug, "");
        event.message_template = None;
        let point = mapper().map(&event);
        assert!(!point.tags.contains_key("messageTemplate"));
        assert_eq!(point.fields["message"], "");
    }

    #[test]
    fn test_message_field_wins_over_property() {
        let event =
            LogEvent::new(Level::Information, "rendered {message}").with_property("message", "x");
        let point = mapper().map(&event);
        assert_eq!(point.fields["message"], "rendered x");
    }

    #[test]
    fn test_timestamp_sources() {
        let created = UNIX_EPOCH + Duration::from_secs(10);
        let delivered = UNIX_EPOCH + Duration::from_secs(20);
        let event = LogEvent::new(Level::Information, "tick").with_timestamp(created);

        let by_event = mapper().map_at(&event, delivered);
        assert_eq!(by_event.timestamp, 10_000_000_000);

        let by_delivery = PointMapper::new(
            "app",
            "web-1",
            Arc::new(DefaultFormatter),
            TimestampSource::Delivery,
        )
        .map_at(&event, delivered);
        assert_eq!(by_delivery.timestamp, 20_000_000_000);
    }

    #[test]
    fn test_timestamp_source_parse() {
        assert_eq!(
            "event".parse::<TimestampSource>().unwrap(),
            TimestampSource::Event
        );
        assert_eq!(
            "Delivery".parse::<TimestampSource>().unwrap(),
            TimestampSource::Delivery
        );
        assert!("later".parse::<TimestampSource>().is_err());
    }

    #[test]
    fn test_line_protocol_encoding() {
        let event = LogEvent::new(Level::Warning, "Disk {disk} full")
            .with_property("disk", "sda 1")
            .with_timestamp(UNIX_EPOCH + Duration::from_nanos(42));
        let point = PointMapper::with_defaults("my app", "host,1").map(&event);

        assert_eq!(
            point.to_line_protocol(),
            r#"my\ app,hostname=host\,1,level=Warning,messageTemplate=Disk\ {disk}\ full disk="sda 1",message="Disk sda 1 full" 42"#
        );
    }

    #[test]
    fn test_line_protocol_escapes_quotes_and_newlines() {
        let point = Point {
            measurement: "m".to_string(),
            tags: BTreeMap::from([("t".to_string(), "a=b\nc".to_string())]),
            fields: BTreeMap::from([("f".to_string(), r#"say "hi" \o/"#.to_string())]),
            timestamp: 1,
        };
        assert_eq!(
            point.to_line_protocol(),
            r#"m,t=a\=b\nc f="say \"hi\" \\o/" 1"#
        );
    }

    #[test]
    fn test_trailing_backslash_keeps_separator() {
        let event = LogEvent::new(Level::Information, r"Saved to C:\logs\")
            .with_timestamp(UNIX_EPOCH);
        let point = PointMapper::with_defaults("app", "h").map(&event);

        assert_eq!(
            point.to_line_protocol(),
            r#"app,hostname=h,level=Information,messageTemplate=Saved\ to\ C:\\logs\\ message="Saved to C:\\logs\\" 0"#
        );
    }

    /// Counts the spaces that separate the sections of a line.
    fn unescaped_spaces(line: &str) -> usize {
        let mut count = 0;
        let mut quoted = false;
        let mut chars = line.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => quoted = !quoted,
                ' ' if !quoted => count += 1,
                _ => {}
            }
        }
        count
    }

    #[test]
    fn test_line_protocol_skips_empty_tags() {
        let point = Point {
            measurement: "m".to_string(),
            tags: BTreeMap::from([
                ("empty".to_string(), String::new()),
                ("level".to_string(), "Debug".to_string()),
            ]),
            fields: BTreeMap::from([("message".to_string(), String::new())]),
            timestamp: 5,
        };
        assert_eq!(point.to_line_protocol(), r#"m,level=Debug message="" 5"#);
    }

    #[test]
    fn test_encode_batch_one_line_per_point() {
        let mapper = mapper();
        let points: Vec<Point> = (0..3)
            .map(|i| mapper.map(&LogEvent::new(Level::Information, "n").with_property("i", i)))
            .collect();
        let body = encode_batch(&points);
        assert_eq!(body.lines().count(), 3);
        assert!(!body.ends_with('\n'));
    }

    #[test]
    fn test_nested_property_rendering() {
        let event = LogEvent::new(Level::Information, "items")
            .with_property("items", Value::from(vec!["a", "b"]));
        let point = mapper().map(&event);
        assert_eq!(point.fields["items"], r#"["a", "b"]"#);
    }

    proptest! {
        #[test]
        fn prop_line_keeps_three_sections(
            measurement in r"[a-z \\,]{1,8}",
            tag in r"[a-zA-Z0-9 ,=\\]*",
            field in r#"[a-zA-Z0-9 ,="\\]*"#,
        ) {
            let point = Point {
                measurement,
                tags: BTreeMap::from([("t\\".to_string(), tag)]),
                fields: BTreeMap::from([("f\\".to_string(), field)]),
                timestamp: 1,
            };
            let line = point.to_line_protocol();
            prop_assert_eq!(unescaped_spaces(&line), 2, "{}", line);
            prop_assert!(line.ends_with(" 1"));
        }

        #[test]
        fn prop_escaped_tag_value_has_no_bare_separators(value in "[a-zA-Z0-9 ,=._\t-]*") {
            let mut out = String::new();
            escape_into(&mut out, &value, &[',', '=', ' ']);
            let mut chars = out.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    chars.next();
                    continue;
                }
                prop_assert!(c != ',' && c != '=' && c != ' ' && c != '\n');
            }
        }
    }
}
