// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hostname detection for the `hostname` tag.

use std::env;
use tracing::warn;

use crate::constants::UNKNOWN_HOSTNAME;

/// Get the host identifier written on every point.
///
/// Tried in order:
/// 1. `INFLUXDB_HOSTNAME` environment variable
/// 2. `HOSTNAME` (or `COMPUTERNAME` on Windows)
/// 3. The system hostname
/// 4. `"unknown"`
#[must_use]
pub fn get_hostname() -> String {
    let from_env = ["INFLUXDB_HOSTNAME", "HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .find(|value| !value.trim().is_empty());
    if let Some(hostname) = from_env {
        return hostname;
    }

    #[cfg(unix)]
    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str().filter(|h| !h.is_empty()) {
                return hostname.to_string();
            }
        }
        Err(e) => warn!("INFLUXDB | Failed to get system hostname: {}", e),
    }

    warn!("INFLUXDB | Could not determine hostname, using '{UNKNOWN_HOSTNAME}'");
    UNKNOWN_HOSTNAME.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_hostname_not_empty() {
        let hostname = get_hostname();
        assert!(!hostname.is_empty());
    }

    #[test]
    fn test_hostname_override() {
        env::set_var("INFLUXDB_HOSTNAME", "test-hostname-override");
        let hostname = get_hostname();
        env::remove_var("INFLUXDB_HOSTNAME");
        assert_eq!(hostname, "test-hostname-override");
    }
}
