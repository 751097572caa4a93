// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use influxdb_logs::{ExporterHandle, LogEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

/// Parses one line of input. Blank lines are skipped, malformed lines are
/// logged and skipped.
pub fn parse_line(line: &str) -> Option<LogEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<LogEvent>(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Skipping malformed log event: {}", e);
            None
        }
    }
}

/// Enqueues every event read from `reader` until end of input.
/// Returns the number of events forwarded.
pub async fn forward_lines<R>(reader: R, handle: &ExporterHandle) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    while let Some(line) = lines.next_line().await? {
        if let Some(event) = parse_line(&line) {
            handle.enqueue(event);
            forwarded += 1;
        }
    }
    debug!("End of input after {} events", forwarded);
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use influxdb_logs::{
        ConnectionInfo, Exporter, ExporterConfig, Level, Point, PointSink, ShippingError,
    };
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink {
        points: Mutex<Vec<Point>>,
    }

    #[async_trait]
    impl PointSink for RecordingSink {
        async fn write(&self, points: &[Point]) -> Result<(), ShippingError> {
            self.points.lock().unwrap().extend_from_slice(points);
            Ok(())
        }
    }

    #[test]
    fn test_parse_line() {
        let event = parse_line(
            r#"{"level":"Warning","messageTemplate":"Disk {disk} full","properties":{"disk":"sda"}}"#,
        )
        .unwrap();
        assert_eq!(event.level, Level::Warning);
        assert_eq!(event.message_template.as_deref(), Some("Disk {disk} full"));
        assert_eq!(event.properties["disk"].to_string(), "sda");

        assert!(parse_line("   ").is_none());
        assert!(parse_line("not json").is_none());
    }

    #[tokio::test]
    async fn test_forward_lines_until_eof() {
        let sink = Arc::new(RecordingSink::default());
        let config = ExporterConfig::new(
            ConnectionInfo::with_token("http://localhost:8086", "tok"),
            "forwarder",
        );
        let mut exporter =
            Exporter::start_with_sink(config, Arc::clone(&sink) as Arc<dyn PointSink>).unwrap();

        let input: &[u8] = b"{\"messageTemplate\":\"one\"}\n\ngarbage\n{\"level\":\"Error\",\"messageTemplate\":\"two\"}\n";
        let forwarded = forward_lines(input, &exporter.handle()).await.unwrap();
        assert_eq!(forwarded, 2);

        exporter.shutdown().await.unwrap();
        let points = sink.points.lock().unwrap();
        let messages: Vec<&str> = points.iter().map(|p| p.fields["message"].as_str()).collect();
        assert_eq!(messages, vec!["one", "two"]);
        assert_eq!(points[1].tags["level"], "Error");
        assert_eq!(points[0].measurement, "forwarder");
    }
}
