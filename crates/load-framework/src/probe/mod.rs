/*
Copyright 2024-2025 The Spice.ai OSS Authors

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

     https://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use std::{
    fmt::Display,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use reqwest::{Client, Method, Url};
use snafu::Snafu;

/// Longest response body prefix kept on a [`ProbeResult`], in characters.
pub const BODY_EXCERPT_LIMIT: usize = 100;

/// Failures below the HTTP layer. An HTTP error status is never a [`TransportError`].
#[derive(Debug, Snafu)]
pub enum TransportError {
    #[snafu(display("Request to {url} timed out after {timeout:?}"))]
    Timeout { url: String, timeout: Duration },

    #[snafu(display("Failed to connect to {url}: {source}"))]
    Connect { url: String, source: reqwest::Error },

    #[snafu(display("Request to {url} failed: {source}"))]
    Request { url: String, source: reqwest::Error },

    #[snafu(display("Failed to read the response body from {url}: {source}"))]
    Body { url: String, source: reqwest::Error },
}

/// One request a virtual user sends on every iteration.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: Url,
    pub method: Method,
    pub body: Option<Arc<str>>,
}

impl Target {
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            body: None,
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Arc<str>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body_excerpt: String,
}

#[derive(Debug)]
pub struct ProbeResult {
    pub url: String,
    pub outcome: Result<HttpResponse, TransportError>,
    pub duration: Duration,
    pub timestamp: SystemTime,
}

impl ProbeResult {
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.outcome.as_ref().ok().map(|r| r.status)
    }

    /// True when a response arrived with a status in `[200, 400)`.
    #[must_use]
    pub fn is_http_success(&self) -> bool {
        self.status().is_some_and(|s| (200..400).contains(&s))
    }
}

/// Issues single timed HTTP requests.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, timeout))
    }

    #[must_use]
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Sends the request and measures the time until the full body has been read.
    pub async fn probe(&self, target: &Target) -> ProbeResult {
        let timestamp = SystemTime::now();
        let start_time = Instant::now();
        let outcome = self.send(target).await;

        ProbeResult {
            url: target.url.to_string(),
            outcome,
            duration: start_time.elapsed(),
            timestamp,
        }
    }

    async fn send(&self, target: &Target) -> Result<HttpResponse, TransportError> {
        let mut request = self
            .client
            .request(target.method.clone(), target.url.clone())
            .timeout(self.timeout);
        if let Some(body) = &target.body {
            request = request.body(body.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.classify(target, e, Stage::Send))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.classify(target, e, Stage::Body))?;

        Ok(HttpResponse {
            status,
            body_excerpt: excerpt(&body),
        })
    }

    fn classify(&self, target: &Target, source: reqwest::Error, stage: Stage) -> TransportError {
        let url = target.url.to_string();
        if source.is_timeout() {
            TransportError::Timeout {
                url,
                timeout: self.timeout,
            }
        } else if source.is_connect() {
            TransportError::Connect { url, source }
        } else {
            match stage {
                Stage::Send => TransportError::Request { url, source },
                Stage::Body => TransportError::Body { url, source },
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Stage {
    Send,
    Body,
}

fn excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(BODY_EXCERPT_LIMIT)
        .collect()
}
