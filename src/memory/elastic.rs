use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{MemoryRecord, MemoryStore, SearchClause, WriteMode, VECTOR_FIELD};
use crate::config::MemoryConfig;
use crate::error::{Result, TranslatorError};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: MemoryRecord,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
}

/// Translation memory kept in an Elasticsearch index, spoken to over its REST API
pub struct ElasticStore {
    client: Client,
    endpoint: String,
    index: String,
    username: Option<String>,
    password: Option<String>,
    insert_attempts: u32,
    batch_retry_delay: Duration,
    single_retry_delay: Duration,
}

impl ElasticStore {
    pub fn from_config(config: &MemoryConfig) -> Result<Self> {
        let password = std::env::var(&config.password_env).ok();
        if config.username.is_some() && password.is_none() {
            warn!("{} is not set, connecting to Elasticsearch without a password", config.password_env);
        }

        Ok(Self {
            client: Client::builder().build()?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            username: config.username.clone(),
            password,
            insert_attempts: config.insert_attempts,
            batch_retry_delay: config.batch_retry_delay(),
            single_retry_delay: config.single_retry_delay(),
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    async fn bulk(&self, records: &[MemoryRecord]) -> Result<()> {
        let url = format!("{}/_bulk", self.endpoint);
        let body = bulk_body(&self.index, records)?;

        let response = self
            .authorize(self.client.post(&url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TranslatorError::Store(format!("Bulk insert failed {}: {}", status, error_text)));
        }

        let summary: BulkResponse = response.json().await?;
        if summary.errors {
            return Err(TranslatorError::Store("Bulk insert reported item errors".to_string()));
        }
        Ok(())
    }

    async fn index_one(&self, record: &MemoryRecord) -> Result<()> {
        let url = format!("{}/{}/_doc/{}", self.endpoint, self.index, record.uid);
        let response = self.authorize(self.client.put(&url)).json(record).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TranslatorError::Store(format!("Indexing {} failed {}: {}", record.uid, status, error_text)));
        }
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for ElasticStore {
    async fn search(&self, should: &[SearchClause], top_k: usize) -> Result<Vec<MemoryRecord>> {
        if should.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/{}/_search", self.endpoint, self.index);
        let response = self
            .authorize(self.client.post(&url))
            .json(&search_body(should, top_k))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TranslatorError::Store(format!("Search failed {}: {}", status, error_text)));
        }

        let result: SearchResponse = response.json().await?;
        debug!("Memory search returned {} hits", result.hits.hits.len());
        Ok(result.hits.hits.into_iter().map(|hit| hit.source).collect())
    }

    async fn upsert(&self, records: &[MemoryRecord], mode: WriteMode, cancel: &CancellationToken) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        match mode {
            WriteMode::Batch => {
                retry_write(self.insert_attempts, self.batch_retry_delay, cancel, move || self.bulk(records)).await?;
            }
            WriteMode::Single => {
                retry_each(records, self.insert_attempts, self.single_retry_delay, cancel, |record| self.index_one(record))
                    .await?;
            }
        }
        info!("Saved {} record(s) to {}", records.len(), self.index);
        Ok(())
    }
}

/// `_search` request body: any clause may match, stored vectors are not returned
fn search_body(should: &[SearchClause], top_k: usize) -> Value {
    json!({
        "query": {
            "bool": {
                "should": should.iter().map(SearchClause::to_query).collect::<Vec<_>>(),
                "minimum_should_match": 1
            }
        },
        "size": top_k,
        "_source": { "excludes": [VECTOR_FIELD] }
    })
}

/// NDJSON `_bulk` body indexing every record under its uid
fn bulk_body(index: &str, records: &[MemoryRecord]) -> Result<String> {
    let mut body = String::new();
    for record in records {
        body.push_str(&serde_json::to_string(&json!({ "index": { "_index": index, "_id": record.uid } }))?);
        body.push('\n');
        body.push_str(&serde_json::to_string(record)?);
        body.push('\n');
    }
    Ok(body)
}

/// Run `op` up to `attempts` times, sleeping `delay` between failures.
/// Cancellation is honored before each attempt and during the sleep.
pub(crate) async fn retry_write<F, Fut>(attempts: u32, delay: Duration, cancel: &CancellationToken, mut op: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let attempts = attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(TranslatorError::Cancelled);
        }
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!("Insert went wrong (attempt {}/{}): {}", attempt, attempts, e);
                last_error = e.to_string();
            }
        }
        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TranslatorError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    Err(TranslatorError::Store(format!(
        "Giving up after {} attempts: {}",
        attempts, last_error
    )))
}

/// Write records one at a time, each with its own retry budget
pub(crate) async fn retry_each<'r, F, Fut>(
    records: &'r [MemoryRecord],
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<()>
where
    F: FnMut(&'r MemoryRecord) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    for record in records {
        retry_write(attempts, delay, cancel, || op(record)).await?;
    }
    Ok(())
}
