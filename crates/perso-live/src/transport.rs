//! **HTTP Transport** — the seam between the client core and the network.
//!
//! The core talks to a `Transport` trait object; production uses
//! `HttpTransport` (blocking reqwest with the `PersoLive-APIKey` header),
//! tests substitute an in-memory fake. Requests carry a fixed 30s timeout,
//! except streaming chat bodies and long-poll status GETs which may block as
//! long as the server keeps the connection open.

use crate::config::ClientConfig;
use crate::error::{PersoError, PersoResult};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Fixed per-call timeout for ordinary requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Status and raw body of a completed request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> PersoResult<Value> {
        serde_json::from_str(&self.body)
            .map_err(|e| PersoError::Payload(format!("invalid JSON response: {}", e)))
    }
}

/// A file part for a multipart upload.
#[derive(Debug, Clone)]
pub struct FormFilePart {
    /// Multipart field name (e.g. `stf_input_audio`).
    pub field: String,
    pub path: PathBuf,
    /// MIME type (e.g. `audio/wav`).
    pub mime: String,
}

/// Outcome of opening a streaming POST: either a readable body or a refusal
/// (non-2xx) with its status and body text.
pub enum StreamBody {
    Open(Box<dyn BufRead + Send>),
    Refused(HttpResponse),
}

/// Synchronous request/response transport. Implement for the real API server
/// or an in-memory fake in tests.
pub trait Transport: Send + Sync {
    /// GET with the standard timeout.
    fn get(&self, path: &str) -> PersoResult<HttpResponse>;

    /// GET without a read timeout (job-status polls).
    fn get_unbounded(&self, path: &str) -> PersoResult<HttpResponse>;

    /// POST a JSON body.
    fn post_json(&self, path: &str, body: &Value) -> PersoResult<HttpResponse>;

    /// PATCH a JSON body.
    fn patch_json(&self, path: &str, body: &Value) -> PersoResult<HttpResponse>;

    /// POST with no body.
    fn post_empty(&self, path: &str) -> PersoResult<HttpResponse>;

    /// POST multipart/form-data: text fields plus at most one file part.
    fn post_form(
        &self,
        path: &str,
        fields: &[(String, String)],
        file: Option<&FormFilePart>,
    ) -> PersoResult<HttpResponse>;

    /// POST a JSON body and stream the response line by line (chat).
    fn post_stream(&self, path: &str, body: &Value) -> PersoResult<StreamBody>;
}

/// Production transport over blocking reqwest.
pub struct HttpTransport {
    config: ClientConfig,
    client: reqwest::blocking::Client,
    /// Client without a read timeout, for chat streams and status polls.
    unbounded: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> PersoResult<Self> {
        let headers = Self::default_headers(&config)?;
        let client = reqwest::blocking::Client::builder()
            .default_headers(headers.clone())
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let unbounded = reqwest::blocking::Client::builder()
            .default_headers(headers)
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(None)
            .build()?;
        Ok(Self {
            config,
            client,
            unbounded,
        })
    }

    fn default_headers(config: &ClientConfig) -> PersoResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "PersoLive-APIKey",
            HeaderValue::from_str(&config.api_key)
                .map_err(|e| PersoError::Transport(format!("invalid API key header: {}", e)))?,
        );
        Ok(headers)
    }

    fn finish(response: reqwest::blocking::Response) -> PersoResult<HttpResponse> {
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Ok(HttpResponse { status, body })
    }
}

impl Transport for HttpTransport {
    fn get(&self, path: &str) -> PersoResult<HttpResponse> {
        let url = self.config.url(path);
        debug!("GET {}", url);
        Self::finish(self.client.get(&url).send()?)
    }

    fn get_unbounded(&self, path: &str) -> PersoResult<HttpResponse> {
        let url = self.config.url(path);
        debug!("GET {} (unbounded)", url);
        Self::finish(self.unbounded.get(&url).send()?)
    }

    fn post_json(&self, path: &str, body: &Value) -> PersoResult<HttpResponse> {
        let url = self.config.url(path);
        debug!("POST {}", url);
        Self::finish(self.client.post(&url).json(body).send()?)
    }

    fn patch_json(&self, path: &str, body: &Value) -> PersoResult<HttpResponse> {
        let url = self.config.url(path);
        debug!("PATCH {}", url);
        Self::finish(self.client.patch(&url).json(body).send()?)
    }

    fn post_empty(&self, path: &str) -> PersoResult<HttpResponse> {
        let url = self.config.url(path);
        debug!("POST {} (empty)", url);
        Self::finish(
            self.client
                .post(&url)
                .header(CONTENT_TYPE, "application/json")
                .send()?,
        )
    }

    fn post_form(
        &self,
        path: &str,
        fields: &[(String, String)],
        file: Option<&FormFilePart>,
    ) -> PersoResult<HttpResponse> {
        let url = self.config.url(path);
        debug!("POST {} (multipart)", url);

        let mut form = reqwest::blocking::multipart::Form::new();
        for (name, value) in fields {
            form = form.text(name.clone(), value.clone());
        }
        if let Some(part) = file {
            let bytes = std::fs::read(&part.path)?;
            let file_name = part
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.bin".to_string());
            let file_part = reqwest::blocking::multipart::Part::bytes(bytes)
                .file_name(file_name)
                .mime_str(&part.mime)
                .map_err(|e| PersoError::Transport(format!("invalid MIME type: {}", e)))?;
            form = form.part(part.field.clone(), file_part);
        }

        Self::finish(self.client.post(&url).multipart(form).send()?)
    }

    fn post_stream(&self, path: &str, body: &Value) -> PersoResult<StreamBody> {
        let url = self.config.url(path);
        debug!("POST {} (stream)", url);
        let response = self.unbounded.post(&url).json(body).send()?;
        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().unwrap_or_default();
            return Ok(StreamBody::Refused(HttpResponse { status, body }));
        }
        Ok(StreamBody::Open(Box::new(std::io::BufReader::new(response))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range() {
        assert!(HttpResponse { status: 201, body: String::new() }.is_success());
        assert!(!HttpResponse { status: 404, body: String::new() }.is_success());
    }

    #[test]
    fn json_parse_failure_is_payload_error() {
        let r = HttpResponse { status: 200, body: "not json".into() };
        assert!(matches!(r.json(), Err(PersoError::Payload(_))));
    }
}
