//! HTTP Step Execution

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};

use super::step::{StepExecutor, StepResult};
use crate::workflow::{BasicAuth, HttpMethod, HttpStep, WorkflowContext};

/// Calls HTTP endpoints with a shared connection pool.
#[derive(Debug, Clone, Default)]
pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn method_of(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Patch => Method::PATCH,
    }
}

/// `Authorization` value for Basic auth.
pub fn basic_auth_header(auth: &BasicAuth) -> String {
    let credentials = format!("{}:{}", auth.username, auth.password);
    format!("Basic {}", STANDARD.encode(credentials))
}

/// JSON content type first, then the step's own headers, then auth.
fn build_headers(step: &HttpStep) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    for (name, value) in &step.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| format!("Invalid header name '{}': {}", name, e))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| format!("Invalid value for header '{}': {}", name, e))?;
        headers.insert(name, value);
    }

    if let Some(auth) = &step.auth {
        if !auth.username.is_empty() && !auth.password.is_empty() {
            let value = HeaderValue::from_str(&basic_auth_header(auth))
                .map_err(|e| format!("Invalid credentials: {}", e))?;
            headers.insert(AUTHORIZATION, value);
        }
    }

    Ok(headers)
}

#[async_trait]
impl StepExecutor for HttpExecutor {
    type Step = HttpStep;

    async fn run_step(&self, step: &HttpStep, _context: &WorkflowContext) -> StepResult {
        let headers = match build_headers(step) {
            Ok(headers) => headers,
            Err(message) => return StepResult::failed(message),
        };

        debug!("{} {}", step.method.as_str(), step.url);
        let mut request = self
            .client
            .request(method_of(step.method), &step.url)
            .headers(headers);

        if let Some(body) = &step.body {
            match serde_json::to_vec(body) {
                Ok(bytes) => request = request.body(bytes),
                Err(e) => return StepResult::failed(format!("Failed to encode body: {}", e)),
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return StepResult::failed(e.to_string()),
        };

        let status = response.status();
        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => return StepResult::failed(e.to_string()),
        };

        if !status.is_success() {
            return StepResult::failed(format!("HTTP {}: {}", status.as_u16(), text));
        }
        StepResult::ok(text)
    }
}
