// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Connection descriptor for the InfluxDB server.
//!
//! [`ConnectionInfo`] is what callers fill in. [`ConnectionInfo::resolve`]
//! validates it once and produces an immutable [`Connection`] with defaults
//! applied and exactly one [`Authentication`] mode selected.

use std::fmt;

use reqwest::Url;

use crate::constants::{DEFAULT_BUCKET_NAME, DEFAULT_ORGANIZATION_NAME};
use crate::errors::ConfigError;

/// Credentials resolved from a [`ConnectionInfo`].
#[derive(Clone, PartialEq, Eq)]
pub enum Authentication {
    /// `Authorization: Token <token>` on every request.
    Token(String),
    /// Sign in with basic credentials and reuse the session cookie.
    Session { username: String, password: String },
}

impl Authentication {
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Authentication::Token(_) => "token",
            Authentication::Session { .. } => "session",
        }
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authentication::Token(_) => f.write_str("Token(<redacted>)"),
            Authentication::Session { username, .. } => f
                .debug_struct("Session")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Connection settings as supplied by the caller.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Base address of the server, e.g. `http://localhost:8086`.
    pub address: String,
    /// Defaults to `LogDb` when unset.
    pub bucket: Option<String>,
    /// Defaults to `None` when unset.
    pub organization: Option<String>,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("address", &self.address)
            .field("bucket", &self.bucket)
            .field("organization", &self.organization)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

impl ConnectionInfo {
    /// Connection authenticated with an API token.
    #[must_use]
    pub fn with_token(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: Some(token.into()),
            ..Default::default()
        }
    }

    /// Connection authenticated with a username and password.
    #[must_use]
    pub fn with_credentials(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            username: Some(username.into()),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    #[must_use]
    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Picks the authentication mode.
    ///
    /// A non-empty token always wins, even when a username and password are
    /// also present. Without a token both username and password are required.
    pub fn authentication(&self) -> Result<Authentication, ConfigError> {
        if let Some(token) = non_empty(self.token.as_ref()) {
            return Ok(Authentication::Token(token.to_string()));
        }
        let username = non_empty(self.username.as_ref()).ok_or(ConfigError::Missing(
            "token or username/password credentials",
        ))?;
        let password = self
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(ConfigError::Missing("password"))?;
        Ok(Authentication::Session {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Validates the settings and applies defaults.
    pub fn resolve(&self) -> Result<Connection, ConfigError> {
        let address = self.address.trim();
        if address.is_empty() {
            return Err(ConfigError::Missing("address"));
        }
        let address = Url::parse(address)
            .map_err(|e| ConfigError::Invalid(format!("address '{address}': {e}")))?;
        if !matches!(address.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "address scheme must be http or https, got '{}'",
                address.scheme()
            )));
        }

        let bucket = match self.bucket.as_deref().map(str::trim) {
            None => DEFAULT_BUCKET_NAME.to_string(),
            Some("") => return Err(ConfigError::Missing("bucket")),
            Some(bucket) => bucket.to_string(),
        };
        let organization = non_empty(self.organization.as_ref())
            .unwrap_or(DEFAULT_ORGANIZATION_NAME)
            .to_string();

        Ok(Connection {
            address,
            bucket,
            organization,
            authentication: self.authentication()?,
        })
    }
}

/// Validated, immutable connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub address: Url,
    pub bucket: String,
    pub organization: String,
    pub authentication: Authentication,
}

impl Connection {
    /// `<address>/api/v2/<path>`, keeping any path prefix of the address.
    pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
        let base = self.address.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/api/v2/{path}"))
            .map_err(|e| ConfigError::Invalid(format!("endpoint '{path}': {e}")))
    }
}
