use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::{RetryPolicy, Result};

/// A single request to one of the upstream endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub url: String,
    pub method: Method,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::POST,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// The transport every crawl request goes through.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// `Fetch` over a `reqwest::Client`.
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json; charset=utf-8"),
        );
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let res = self
            .client
            .request(request.method.clone(), &request.url)
            .send()
            .await?;
        let status = res.status().as_u16();
        let body = res.text().await?;
        Ok(Response { status, body })
    }
}

/// Outcome of `retry_fetch`. Running out of retries is an ordinary outcome, not an error.
#[derive(Debug)]
pub enum Fetched {
    Response(Response),
    /// Every attempt failed. `target` is what goes into the failure log.
    Exhausted { target: String },
}

impl Fetched {
    pub fn into_response(self) -> Option<Response> {
        match self {
            Fetched::Response(res) => Some(res),
            Fetched::Exhausted { .. } => None,
        }
    }
}

/// Issues `request` until it succeeds or `policy.retries` retries have been spent.
/// Any transport error or non-success status counts as a failed attempt.
pub async fn retry_fetch<F: Fetch + ?Sized>(
    fetcher: &F,
    request: &Request,
    policy: RetryPolicy,
) -> Fetched {
    let mut retries_left = policy.retries;
    loop {
        let failure = match fetcher.fetch(request).await {
            Ok(res) if res.is_success() => return Fetched::Response(res),
            Ok(res) => format!("status {}", res.status),
            Err(e) => e.to_string(),
        };

        if retries_left == 0 {
            debug!(url = %request.url, %failure, "giving up");
            return Fetched::Exhausted {
                target: request.url.clone(),
            };
        }
        warn!(
            url = %request.url,
            %failure,
            "*Retrying [{retries_left} Retries Remaining]*"
        );
        tokio::time::sleep(policy.delay).await;
        retries_left -= 1;
    }
}

/// Awaits every task of an indexed `JoinSet` and returns the results in spawn order.
pub(crate) async fn join_ordered<T: 'static>(
    mut task_set: JoinSet<(usize, T)>,
    len: usize,
) -> Result<Vec<T>> {
    let mut slots: Vec<Option<T>> = (0..len).map(|_| None).collect();
    while let Some(task) = task_set.join_next().await {
        let (idx, value) = task?;
        slots[idx] = Some(value);
    }
    Ok(slots.into_iter().flatten().collect())
}
