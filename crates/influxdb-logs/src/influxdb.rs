// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Point sinks.
//!
//! [`PointSink`] is the seam between the flush loop and the network.
//! [`InfluxDbApi`] implements it against the InfluxDB v2 HTTP API:
//!
//! - `POST /api/v2/write?org=..&bucket=..&precision=ns` with a line protocol body
//! - `POST /api/v2/signin` with basic credentials when session auth is used
//! - `POST /api/v2/signout` when the sink is closed
//!
//! The client is created once and only used from the flush task.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::connection::{Authentication, Connection};
use crate::constants::POOL_IDLE_TIMEOUT;
use crate::errors::{ConfigError, ExporterError, ShippingError};
use crate::point::{encode_batch, Point};

/// Destination for mapped points.
#[async_trait]
pub trait PointSink: Send + Sync {
    /// Writes the whole set of points in one call.
    async fn write(&self, points: &[Point]) -> Result<(), ShippingError>;

    /// Releases any server-side state held by the sink.
    async fn close(&self) {}
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

async fn describe_failure(resp: reqwest::Response) -> String {
    let body = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) if !parsed.message.is_empty() => format!("{}: {}", parsed.code, parsed.message),
        _ => body,
    }
}

fn build_client(timeout: Duration, https_proxy: Option<&str>) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(Duration::from_secs(120));
    if let Some(proxy) = https_proxy {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}

/// InfluxDB v2 HTTP client.
#[derive(Debug)]
pub struct InfluxDbApi {
    client: reqwest::Client,
    authentication: Authentication,
    write_url: Url,
    signin_url: Url,
    signout_url: Url,
    headers: HeaderMap,
    session: Mutex<Option<HeaderValue>>,
}

impl InfluxDbApi {
    pub fn new(
        connection: &Connection,
        timeout: Duration,
        https_proxy: Option<&str>,
    ) -> Result<Self, ExporterError> {
        let client =
            build_client(timeout, https_proxy).map_err(|e| ExporterError::Client(e.to_string()))?;

        let mut write_url = connection.endpoint("write")?;
        write_url
            .query_pairs_mut()
            .append_pair("org", &connection.organization)
            .append_pair("bucket", &connection.bucket)
            .append_pair("precision", "ns");

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Authentication::Token(token) = &connection.authentication {
            let mut value = HeaderValue::from_str(&format!("Token {token}")).map_err(|_| {
                ConfigError::Invalid("token contains characters not allowed in a header".to_string())
            })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            client,
            authentication: connection.authentication.clone(),
            write_url,
            signin_url: connection.endpoint("signin")?,
            signout_url: connection.endpoint("signout")?,
            headers,
            session: Mutex::new(None),
        })
    }

    /// Returns the session cookie, signing in first if there is none.
    async fn session_cookie(&self) -> Result<Option<HeaderValue>, ShippingError> {
        let Authentication::Session { username, password } = &self.authentication else {
            return Ok(None);
        };
        let mut session = self.session.lock().await;
        if let Some(cookie) = session.as_ref() {
            return Ok(Some(cookie.clone()));
        }

        debug!("INFLUXDB | Signing in as {username}");
        let resp = self
            .client
            .post(self.signin_url.clone())
            .basic_auth(username, Some(password))
            .send()
            .await
            .map_err(|e| ShippingError::Destination(None, format!("sign-in failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let reason = describe_failure(resp).await;
            return Err(ShippingError::Authentication(format!("{status}: {reason}")));
        }

        let cookie = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(str::trim)
            .find(|pair| !pair.is_empty())
            .and_then(|pair| HeaderValue::from_str(pair).ok())
            .ok_or_else(|| {
                ShippingError::Authentication("sign-in response carried no session cookie".to_string())
            })?;

        *session = Some(cookie.clone());
        Ok(Some(cookie))
    }

    async fn write_once(&self, body: &str) -> Result<(), ShippingError> {
        let mut request = self
            .client
            .post(self.write_url.clone())
            .headers(self.headers.clone())
            .body(body.to_owned());
        if let Some(cookie) = self.session_cookie().await? {
            request = request.header(COOKIE, cookie);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| ShippingError::Destination(e.status(), e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::UNAUTHORIZED {
            // Expired or revoked session: sign in again on the next attempt.
            self.session.lock().await.take();
            let reason = describe_failure(resp).await;
            return Err(ShippingError::Authentication(format!("{status}: {reason}")));
        }
        let reason = describe_failure(resp).await;
        Err(ShippingError::Destination(Some(status), reason))
    }
}

#[async_trait]
impl PointSink for InfluxDbApi {
    /// One request per call. Retries are driven by [`crate::flusher::Flusher`].
    async fn write(&self, points: &[Point]) -> Result<(), ShippingError> {
        if points.is_empty() {
            return Err(ShippingError::Payload("no points to write".to_string()));
        }
        self.write_once(&encode_batch(points)).await?;
        debug!("INFLUXDB | Wrote {} points", points.len());
        Ok(())
    }

    async fn close(&self) {
        let Some(cookie) = self.session.lock().await.take() else {
            return;
        };
        match self
            .client
            .post(self.signout_url.clone())
            .header(COOKIE, cookie)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => debug!("INFLUXDB | Signed out"),
            Ok(resp) => debug!("INFLUXDB | Sign-out returned {}", resp.status()),
            Err(e) => error!("INFLUXDB | Sign-out failed: {e}"),
        }
    }
}
