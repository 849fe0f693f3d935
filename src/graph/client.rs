use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::graph::models::Page;
use crate::graph::pipeline::{GraphRequest, GraphResponse, Pipeline};
use crate::graph::{GraphError, GraphResult};

const JSON_MEDIA_TYPE: &str = "application/json";
const OCTET_STREAM_MEDIA_TYPE: &str = "application/octet-stream";
const REDACTED_BODY_MAX_LEN: usize = 200;

/// Verb-level client over the request pipeline.
///
/// Endpoints are relative to the API base unless they are absolute URLs
/// (pagination links are). Every request races the client's cancellation
/// token.
#[derive(Clone)]
pub struct GraphHttpClient {
    pipeline: Arc<Pipeline>,
    base_url: String,
    cancel: CancellationToken,
}

impl GraphHttpClient {
    pub fn new(pipeline: Arc<Pipeline>, base_url: impl Into<String>) -> Self {
        Self {
            pipeline,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cancel: CancellationToken::new(),
        }
    }

    /// Same pipeline, bound to the caller's cancellation token.
    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            base_url: self.base_url.clone(),
            cancel,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn request_uri(&self, endpoint: &str) -> String {
        if endpoint.starts_with("https://") || endpoint.starts_with("http://") {
            endpoint.to_string()
        } else {
            format!("{}{}", self.base_url, endpoint)
        }
    }

    pub async fn get(&self, endpoint: &str) -> GraphResult<String> {
        let response = self.send_checked(Method::GET, endpoint, None).await?;
        self.read_text(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> GraphResult<T> {
        let content = self.get(endpoint).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Fetches `endpoint` selecting only `key` and returns that top-level
    /// field as a string.
    pub async fn get_field(&self, endpoint: &str, key: &str) -> GraphResult<String> {
        let content = self.get(&with_select(endpoint, &[key])).await?;
        let json: Value = serde_json::from_str(&content)?;
        match json.get(key) {
            Some(Value::String(value)) => Ok(value.clone()),
            Some(Value::Null) | None => {
                error!(key, endpoint, "key was not found in the response");
                Err(GraphError::FieldNotFound(key.to_string()))
            }
            Some(other) => Ok(other.to_string()),
        }
    }

    /// Follows `@odata.nextLink` until it is absent, concatenating `value`
    /// arrays in the order the pages arrive.
    pub async fn get_paginated<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        select: &[&str],
    ) -> GraphResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next = Some(with_select(endpoint, select));
        let mut pages = 0usize;

        while let Some(current) = next.take() {
            let content = self.get(&current).await?;
            let page: Page<T> = serde_json::from_str(&content)?;
            pages += 1;
            items.extend(page.value);
            next = page.next_link;
        }

        debug!(endpoint, pages, items = items.len(), "paginated listing complete");
        Ok(items)
    }

    /// Response body as a stream of chunks; nothing is buffered up front.
    pub async fn get_stream(
        &self,
        endpoint: &str,
    ) -> GraphResult<BoxStream<'static, GraphResult<Bytes>>> {
        Ok(self
            .send_checked(Method::GET, endpoint, None)
            .await?
            .into_stream())
    }

    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> GraphResult<String> {
        let data = serde_json::to_vec(body)?;
        let response = self
            .send_checked(Method::POST, endpoint, Some((JSON_MEDIA_TYPE, data.into())))
            .await?;
        self.read_text(response).await
    }

    pub async fn put_bytes(&self, endpoint: &str, content: Vec<u8>) -> GraphResult<String> {
        let response = self
            .send_checked(
                Method::PUT,
                endpoint,
                Some((OCTET_STREAM_MEDIA_TYPE, content.into())),
            )
            .await?;
        self.read_text(response).await
    }

    /// Status-only existence check: `true` for any 2xx, `false` for any other status.
    /// Only transport failures are errors.
    pub async fn is_successful(&self, endpoint: &str) -> GraphResult<bool> {
        let response = self.send(Method::GET, endpoint, None).await?;
        Ok(response.status().is_success())
    }

    async fn send_checked(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<(&'static str, Bytes)>,
    ) -> GraphResult<GraphResponse> {
        let response = self.send(method.clone(), endpoint, body).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let reason = response.reason();
        let body = self.read_text(response).await.unwrap_or_default();
        error!(
            method = %method,
            endpoint,
            status = status.as_u16(),
            reason,
            body = %redact_response_body(&body),
            "request failed"
        );
        Err(GraphError::RequestFailed {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            reason: reason.to_string(),
        })
    }

    async fn send(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<(&'static str, Bytes)>,
    ) -> GraphResult<GraphResponse> {
        let uri = self.request_uri(endpoint);
        let url = Url::parse(&uri)
            .map_err(|err| GraphError::Config(format!("invalid request url {uri}: {err}")))?;

        let mut request = GraphRequest::new(method, url);
        if let Some((content_type, data)) = body {
            request = request.with_body(content_type, data);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GraphError::Cancelled),
            result = self.pipeline.execute(request) => result,
        }
    }

    async fn read_text(&self, response: GraphResponse) -> GraphResult<String> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GraphError::Cancelled),
            text = response.text() => text,
        }
    }
}

/// Appends `$select=a,b` to `endpoint`; unchanged when `keys` is empty.
pub fn with_select(endpoint: &str, keys: &[&str]) -> String {
    if keys.is_empty() {
        return endpoint.to_string();
    }

    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{endpoint}{separator}$select={}", keys.join(","))
}

fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }

    let cut = (0..=REDACTED_BODY_MAX_LEN)
        .rev()
        .find(|idx| trimmed.is_char_boundary(*idx))
        .unwrap_or(0);
    format!("{}…[truncated {} bytes]", &trimmed[..cut], trimmed.len())
}
