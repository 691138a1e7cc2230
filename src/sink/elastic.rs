use crate::sink::registry::IndexRegistry;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const DOC_TYPE: &str = "accesslogentry";

#[derive(Debug, Error)]
pub enum ElasticError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("backend returned status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// Client for the search backend: index probing, creation with the fixed
/// access-log mapping, and bulk ingestion of batch files. All uploaders
/// share one client and its index registry.
pub struct ElasticClient {
    base_url: String,
    basic_auth: String,
    client: reqwest::Client,
    registry: Arc<IndexRegistry>,
}

impl ElasticClient {
    pub fn new(base_url: String, basic_auth: String, registry: Arc<IndexRegistry>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            basic_auth,
            client: reqwest::Client::new(),
            registry,
        }
    }

    /// Probe whether the index exists. A 200 also records it in the
    /// registry. Some proxies wrap the 404 in a JSON error body; those count
    /// as absent too.
    pub async fn check(&self, index: &str) -> Result<bool, ElasticError> {
        let index = normalize(index);
        let url = format!("{}/{}?pretty", self.base_url, index);
        debug!(url = %url, "probing index");

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, &self.basic_auth)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                debug!(index = %index, "index exists");
                self.registry.insert(&index);
                Ok(true)
            }
            StatusCode::NOT_FOUND => {
                debug!(index = %index, "index does not exist");
                Ok(false)
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                let wrapped_404 = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|value| value.get("status").and_then(|s| s.as_i64()))
                    == Some(404);
                if wrapped_404 {
                    return Ok(false);
                }
                Err(ElasticError::UnexpectedStatus {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    /// Ensure the index exists with the access-log mapping. The fast path
    /// consults the registry, then the backend; creation itself runs under
    /// the registry's creation lock with both checks repeated, so no two
    /// create requests for the same index leave this process concurrently.
    pub async fn create_index(&self, index: &str) -> Result<(), ElasticError> {
        let index = normalize(index);

        if self.registry.contains(&index) {
            return Ok(());
        }
        if self.check(&index).await? {
            return Ok(());
        }

        let _guard = self.registry.lock_creation().await;

        if self.registry.contains(&index) {
            return Ok(());
        }
        if self.check(&index).await? {
            return Ok(());
        }

        let url = format!("{}/{}?pretty", self.base_url, index);
        let body = serde_json::to_vec_pretty(&mapping_payload())?;

        info!(index = %index, url = %url, "creating index");
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, &self.basic_auth)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, body.len())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ElasticError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        self.registry.insert(&index);
        info!(index = %index, "created index");

        Ok(())
    }

    /// Submit a batch file as one bulk request. The file is left in place on
    /// failure so the payload can be inspected or replayed by hand.
    pub async fn upload(&self, file: &Path, index: &str) -> Result<(), ElasticError> {
        self.create_index(index).await?;

        let index = normalize(index);
        let size = tokio::fs::metadata(file).await?.len();
        let body = tokio::fs::read(file).await?;
        let url = format!("{}/{}/{}/_bulk?pretty", self.base_url, index, DOC_TYPE);

        info!(path = %file.display(), url = %url, size = size, "uploading batch");
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, &self.basic_auth)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(ElasticError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }

        info!(path = %file.display(), index = %index, "finished uploading batch");

        Ok(())
    }
}

fn normalize(index: &str) -> String {
    index.trim().to_lowercase()
}

/// The fixed mapping for access-log indices: one shard, typed fields, and a
/// timestamp format matching the documents' `@timestamp` rendering.
fn mapping_payload() -> serde_json::Value {
    fn not_analyzed_string() -> serde_json::Value {
        json!({"type": "string", "index": "not_analyzed"})
    }
    fn zero_default_integer() -> serde_json::Value {
        json!({"type": "integer", "null_value": 0})
    }

    json!({
        "settings": {
            "number_of_shards": 1
        },
        "mappings": {
            "_default_": {
                "_id": {
                    "path": "_id"
                },
                "_timestamp": {
                    "enabled": true,
                    "store": true,
                    "path": "@timestamp",
                    "format": "YYYY-MM-dd'T'HH:mm:ss'Z'"
                },
                "properties": {
                    "@timestamp": {
                        "type": "date",
                        "format": "YYYY-MM-dd'T'HH:mm:ss'Z'"
                    },
                    "host": not_analyzed_string(),
                    "ip": {"type": "ip"},
                    "path": not_analyzed_string(),
                    "verb": not_analyzed_string(),
                    "user_agent": not_analyzed_string(),
                    "status": zero_default_integer(),
                    "request_bytes": zero_default_integer(),
                    "response_bytes": zero_default_integer(),
                    "response_time": zero_default_integer(),
                    "city": not_analyzed_string(),
                    "coordinates": {"type": "geo_point"},
                    "query": {"type": "object"},
                    "country": {
                        "type": "object",
                        "properties": {
                            "IsoCode": not_analyzed_string(),
                            "Name": not_analyzed_string()
                        }
                    },
                    "continent": {
                        "type": "object",
                        "properties": {
                            "IsoCode": not_analyzed_string(),
                            "Name": not_analyzed_string()
                        }
                    },
                    "isp": {
                        "type": "object",
                        "properties": {
                            "Name": not_analyzed_string(),
                            "Organization": not_analyzed_string()
                        }
                    }
                }
            }
        }
    })
}
