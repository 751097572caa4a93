// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;
use std::process::ExitCode;

use tokio::io::BufReader;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use influxdb_logs::{Exporter, ExporterConfig};

mod logger;
mod stdin;

fn init_logging(log_level: &str) {
    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{log_level}");

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .event_format(logger::Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let log_level = env::var("INFLUXDB_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    init_logging(&log_level);
    debug!("Logging subsystem enabled");

    let config = match ExporterConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error reading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut exporter = match Exporter::start(config) {
        Ok(exporter) => exporter,
        Err(e) => {
            error!("Error starting exporter: {e}");
            return ExitCode::FAILURE;
        }
    };
    let handle = exporter.handle();

    let reader = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = stdin::forward_lines(reader, &handle) => match result {
            Ok(forwarded) => info!("Input closed after {forwarded} events, shutting down"),
            Err(e) => error!("Error reading input: {e}"),
        },
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    match exporter.shutdown().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error during shutdown: {e}");
            ExitCode::FAILURE
        }
    }
}
