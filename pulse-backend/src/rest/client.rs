use std::sync::{Arc, PoisonError, RwLock};

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{BackendError, BackendResult};

/// Query string pairs; values are URL-encoded when the request is built
pub type Params = Vec<(&'static str, String)>;

/// Thin HTTP client for the hosted REST, auth and storage endpoints
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            anon_key: anon_key.into(),
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Token sent as the bearer on every request; the anon key is used when unset
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().unwrap_or_else(PoisonError::into_inner) = token;
    }

    fn bearer(&self) -> String {
        self.access_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| self.anon_key.clone())
    }

    /// Request against `{base_url}{path}` carrying the api key and bearer token
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request_with_token(method, path, &self.bearer())
    }

    pub fn request_with_token(&self, method: Method, path: &str, token: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    fn table(&self, method: Method, table: &str) -> RequestBuilder {
        self.request(method, &format!("/rest/v1/{}", table))
    }

    /// GET rows of a table
    pub async fn select<T: DeserializeOwned>(&self, table: &str, params: &Params) -> BackendResult<Vec<T>> {
        tracing::debug!("GET {} {:?}", table, params);
        let response = self.table(Method::GET, table).query(params).send().await?;
        handle_response(response).await
    }

    /// POST rows and get the stored representation back
    pub async fn insert<B, T>(&self, table: &str, params: &Params, body: &B) -> BackendResult<Vec<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        tracing::debug!("POST {}", table);
        let response = self
            .table(Method::POST, table)
            .query(params)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        handle_response(response).await
    }

    /// POST rows without reading them back
    pub async fn insert_minimal<B>(&self, table: &str, prefer: &str, params: &Params, body: &B) -> BackendResult<()>
    where
        B: Serialize + ?Sized,
    {
        tracing::debug!("POST {} ({})", table, prefer);
        let response = self
            .table(Method::POST, table)
            .query(params)
            .header("Prefer", prefer)
            .json(body)
            .send()
            .await?;
        handle_empty(response).await
    }

    /// PATCH matching rows and return them
    pub async fn update<B, T>(&self, table: &str, params: &Params, body: &B) -> BackendResult<Vec<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        tracing::debug!("PATCH {} {:?}", table, params);
        let response = self
            .table(Method::PATCH, table)
            .query(params)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        handle_response(response).await
    }

    /// PATCH matching rows without reading them back
    pub async fn update_minimal<B>(&self, table: &str, params: &Params, body: &B) -> BackendResult<()>
    where
        B: Serialize + ?Sized,
    {
        tracing::debug!("PATCH {} {:?}", table, params);
        let response = self
            .table(Method::PATCH, table)
            .query(params)
            .header("Prefer", "return=minimal")
            .json(body)
            .send()
            .await?;
        handle_empty(response).await
    }

    pub async fn delete(&self, table: &str, params: &Params) -> BackendResult<()> {
        tracing::debug!("DELETE {} {:?}", table, params);
        let response = self.table(Method::DELETE, table).query(params).send().await?;
        handle_empty(response).await
    }

    /// Exact row count of the matching rows, without transferring them
    pub async fn count(&self, table: &str, params: &Params) -> BackendResult<u64> {
        let response = self
            .table(Method::HEAD, table)
            .query(params)
            .header("Prefer", "count=exact")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status, String::new()));
        }

        response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| BackendError::Api("Missing row count in response".to_string()))
    }

    /// Upload raw bytes to object storage
    pub async fn upload(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> BackendResult<()> {
        tracing::debug!("Uploading {} bytes to {}/{}", bytes.len(), bucket, path);
        let response = self
            .request(Method::POST, &format!("/storage/v1/object/{}/{}", bucket, encode_path(path)))
            .header("Content-Type", content_type)
            .header("cache-control", "max-age=3600")
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        handle_empty(response).await
    }

    /// Public URL of an object in a public bucket
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, encode_path(path))
    }
}

/// Helper to handle API responses
pub async fn handle_response<T: DeserializeOwned>(response: Response) -> BackendResult<T> {
    let status = response.status();

    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        Err(status_error(status, error_text))
    }
}

/// Like [`handle_response`] for endpoints whose body is ignored
pub async fn handle_empty(response: Response) -> BackendResult<()> {
    let status = response.status();

    if status.is_success() {
        Ok(())
    } else {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        Err(status_error(status, error_text))
    }
}

fn status_error(status: StatusCode, body: String) -> BackendError {
    let message = error_message(status, &body);
    match status.as_u16() {
        404 => BackendError::NotFound(message),
        401 | 403 => BackendError::Unauthorized(message),
        400 | 422 => BackendError::BadRequest(message),
        409 => BackendError::Conflict(message),
        _ => BackendError::Api(message),
    }
}

/// Readable message from an error body. REST errors carry `message`,
/// auth errors `msg` or `error_description`.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "msg", "error_description", "error"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }

    // Clean up HTML error messages (e.g., from proxy 404 pages)
    if body.contains("<html>") || body.contains("<!DOCTYPE") || body.trim().is_empty() {
        format!("Server returned {} error. Please check the backend URL.", status.as_u16())
    } else {
        body.to_string()
    }
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

/// Percent-encode each segment of an object path, keeping the separators
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
