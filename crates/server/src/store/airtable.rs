use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, Method, RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

use super::{Fields, ListQuery, Record, RecordStore, Table};
use crate::config::{RetryConfig, StoreConfig, TableIds};
use crate::error::StoreError;

/// HTTP client for an Airtable-compatible REST API
#[derive(Clone)]
pub struct AirtableStore {
    client: Client,
    base: Url,
    api_key: String,
    base_id: String,
    tables: TableIds,
    retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    records: Vec<Record>,
    #[serde(default)]
    offset: Option<String>,
}

impl AirtableStore {
    pub fn new(config: &StoreConfig, retry: RetryConfig) -> Result<Self, StoreError> {
        let base = Url::parse(&config.api_base)
            .map_err(|e| StoreError::InvalidUrl(format!("{}: {}", config.api_base, e)))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::InvalidUrl(config.api_base.clone()));
        }

        Ok(Self {
            client: Client::new(),
            base,
            api_key: config.api_key.clone(),
            base_id: config.base_id.clone(),
            tables: config.tables.clone(),
            retry,
        })
    }

    fn table_id(&self, table: Table) -> &str {
        match table {
            Table::Boards => &self.tables.boards,
            Table::Sessions => &self.tables.sessions,
            Table::Topics => &self.tables.topics,
            Table::Votes => &self.tables.votes,
            Table::Comments => &self.tables.comments,
            Table::Users => &self.tables.users,
        }
    }

    fn url(&self, table: Table, id: Option<&str>) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::InvalidUrl(self.base.to_string()))?;
            segments.pop_if_empty().push(&self.base_id).push(self.table_id(table));
            if let Some(id) = id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    /// Send a request, retrying on 429 with the store's hint or exponential backoff
    async fn send(&self, build: impl Fn() -> RequestBuilder) -> Result<Value, StoreError> {
        let this = self;
        let exchange = with_retries(&self.retry, move || this.exchange(build())).await?;

        if exchange.status.is_success() {
            return Ok(exchange.payload);
        }
        Err(StoreError::upstream(exchange.status.as_u16(), exchange.payload))
    }

    async fn exchange(&self, request: RequestBuilder) -> Result<Exchange, StoreError> {
        let response = request.bearer_auth(&self.api_key).send().await?;
        let status = response.status();
        let retry_after = retry_after(response.headers());
        Ok(Exchange {
            status,
            retry_after,
            payload: read_payload(response).await?,
        })
    }

    async fn send_record(&self, build: impl Fn() -> RequestBuilder) -> Result<Record, StoreError> {
        let payload = self.send(build).await?;
        Ok(serde_json::from_value(payload)?)
    }
}

/// One round trip with the store
#[derive(Debug)]
struct Exchange {
    status: StatusCode,
    retry_after: Option<Duration>,
    payload: Value,
}

/// Repeat `exchange` while the store answers 429, at most `max_retries` extra times
async fn with_retries<F, Fut>(retry: &RetryConfig, mut exchange: F) -> Result<Exchange, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Exchange, StoreError>>,
{
    let mut attempt = 0;
    loop {
        let reply = exchange().await?;
        if reply.status != StatusCode::TOO_MANY_REQUESTS || attempt >= retry.max_retries {
            return Ok(reply);
        }

        let delay = retry.delay(attempt, reply.retry_after);
        tracing::warn!(
            "Record store rate limited, retry {} of {} in {:?}",
            attempt + 1,
            retry.max_retries,
            delay
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// `Retry-After` in seconds. Values a `Duration` cannot hold are ignored.
fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let seconds: f64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

/// Empty bodies read as `{}` and non-JSON bodies are wrapped as `{"message": ...}`
async fn read_payload(response: reqwest::Response) -> Result<Value, StoreError> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(json!({}));
    }
    Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "message": text })))
}

#[async_trait]
impl RecordStore for AirtableStore {
    async fn get(&self, table: Table, id: &str) -> Result<Record, StoreError> {
        let url = self.url(table, Some(id))?;
        tracing::debug!("GET {} {}", table.name(), id);
        self.send_record(|| self.client.get(url.clone())).await
    }

    async fn list(&self, table: Table, query: ListQuery) -> Result<Vec<Record>, StoreError> {
        let url = self.url(table, None)?;
        let formula = query.filter.as_ref().map(|filter| filter.to_formula());
        tracing::debug!("LIST {} where {:?}", table.name(), formula);

        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut params: Vec<(&str, String)> = Vec::new();
            if let Some(formula) = &formula {
                params.push(("filterByFormula", formula.clone()));
            }
            if let Some(max_records) = query.max_records {
                params.push(("maxRecords", max_records.to_string()));
            }
            if let Some(offset) = &offset {
                params.push(("offset", offset.clone()));
            }

            let payload = self.send(|| self.client.get(url.clone()).query(&params)).await?;
            let page: Page = serde_json::from_value(payload)?;
            records.extend(page.records);

            match page.offset {
                Some(next) if !next.is_empty() => offset = Some(next),
                _ => break,
            }
        }
        Ok(records)
    }

    async fn create(&self, table: Table, fields: Fields) -> Result<Record, StoreError> {
        let url = self.url(table, None)?;
        tracing::debug!("CREATE {}", table.name());
        let body = json!({ "fields": fields });
        self.send_record(|| self.client.request(Method::POST, url.clone()).json(&body))
            .await
    }

    async fn update(&self, table: Table, id: &str, fields: Fields) -> Result<Record, StoreError> {
        let url = self.url(table, Some(id))?;
        tracing::debug!("UPDATE {} {}", table.name(), id);
        let body = json!({ "fields": fields });
        self.send_record(|| self.client.request(Method::PATCH, url.clone()).json(&body))
            .await
    }

    async fn delete(&self, table: Table, id: &str) -> Result<(), StoreError> {
        let url = self.url(table, Some(id))?;
        tracing::debug!("DELETE {} {}", table.name(), id);
        self.send(|| self.client.delete(url.clone())).await?;
        Ok(())
    }
}
