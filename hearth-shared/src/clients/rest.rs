use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::RemoteConfig;
use crate::errors::{AppError, AppResult, ErrorCode};

/// Client for the hosted data API (PostgREST-style REST over tables).
///
/// Every request carries the `apikey` header; row-level security is
/// enforced remotely from the bearer token attached per query.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base: String,
    api_key: String,
}

impl RestClient {
    pub fn new(config: &RemoteConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()
            .map_err(AppError::Transport)?;

        Ok(Self {
            http,
            base: format!("{}/rest/v1", config.api_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }

    /// Start a query against `table`.
    pub fn table(&self, table: &str) -> QueryBuilder {
        QueryBuilder {
            http: self.http.clone(),
            url: format!("{}/{table}", self.base),
            api_key: self.api_key.clone(),
            params: Vec::new(),
            token: None,
            timeout: None,
        }
    }

    /// Invoke a remote procedure, e.g. `create_family_for_user`.
    pub async fn rpc<A, R>(&self, function: &str, args: &A, token: &str) -> AppResult<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/rpc/{function}", self.base);
        let response = self
            .http
            .post(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .json(args)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(data_error(status, &body));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| AppError::new(ErrorCode::DecodeError, format!("rpc {function}: {e}")))
    }
}

/// Accumulates filters and modifiers for a single table request.
pub struct QueryBuilder {
    http: reqwest::Client,
    url: String,
    api_key: String,
    params: Vec<(String, String)>,
    token: Option<String>,
    timeout: Option<Duration>,
}

impl QueryBuilder {
    /// `column = value` filter (`?column=eq.value`).
    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.params
            .push((column.to_string(), format!("eq.{}", value.to_string())));
        self
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.params.push(("select".into(), columns.into()));
        self
    }

    pub fn order(mut self, expr: &str) -> Self {
        self.params.push(("order".into(), expr.into()));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.params.push(("limit".into(), n.to_string()));
        self
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Per-request timeout override (the client default applies otherwise).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn fetch<T: DeserializeOwned>(self) -> AppResult<Vec<T>> {
        let request = self.request(reqwest::Method::GET);
        let response = request.send().await?;
        decode_rows(response).await
    }

    /// Single-row read; `Ok(None)` when no row matches.
    pub async fn fetch_optional<T: DeserializeOwned>(self) -> AppResult<Option<T>> {
        let rows: Vec<T> = self.limit(1).fetch().await?;
        Ok(rows.into_iter().next())
    }

    /// Insert one row and return the written representation.
    pub async fn insert<B, T>(self, row: &B) -> AppResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .request(reqwest::Method::POST)
            .header("Prefer", "return=representation")
            .json(row);
        let response = request.send().await?;
        let mut rows: Vec<T> = decode_rows(response).await?;
        match rows.pop() {
            Some(written) => Ok(written),
            None => Err(AppError::new(
                ErrorCode::DecodeError,
                "insert returned no representation",
            )),
        }
    }

    /// Patch every row matching the filters, returning the updated rows.
    pub async fn update<B, T>(self, patch: &B) -> AppResult<Vec<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self
            .request(reqwest::Method::PATCH)
            .header("Prefer", "return=representation")
            .json(patch);
        let response = request.send().await?;
        decode_rows(response).await
    }

    pub async fn delete(self) -> AppResult<()> {
        let response = self.request(reqwest::Method::DELETE).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(data_error(status, &body));
        }
        Ok(())
    }

    fn request(&self, method: reqwest::Method) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .request(method, &self.url)
            .header("apikey", &self.api_key)
            .query(&self.params);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        request
    }
}

async fn decode_rows<T: DeserializeOwned>(response: reqwest::Response) -> AppResult<Vec<T>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(data_error(status, &body));
    }
    response
        .json::<Vec<T>>()
        .await
        .map_err(|e| AppError::new(ErrorCode::DecodeError, format!("row decode: {e}")))
}

fn data_error(status: reqwest::StatusCode, body: &str) -> AppError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| format!("data API request failed with status {status}"));

    let code = match status.as_u16() {
        401 => ErrorCode::Unauthorized,
        403 => ErrorCode::PermissionDenied,
        404 => ErrorCode::NotFound,
        408 => ErrorCode::Timeout,
        409 => ErrorCode::Conflict,
        s if s >= 500 => ErrorCode::ServiceUnavailable,
        _ => ErrorCode::ValidationError,
    };

    AppError::new(code, message)
}
