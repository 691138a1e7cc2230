use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub parser: ParserConfig,
    pub elasticsearch: ElasticsearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub s3: S3Config,
    pub tmpdir: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_poll_interval() -> u64 {
    300
}

fn default_page_size() -> usize {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    pub tmpdir: PathBuf,
    #[serde(default = "default_batch_max_docs")]
    pub batch_max_docs: usize,
    #[serde(default = "default_geoip_db")]
    pub geoip_db: PathBuf,
}

fn default_batch_max_docs() -> usize {
    20000
}

fn default_geoip_db() -> PathBuf {
    PathBuf::from("GeoLite2-City.mmdb")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    pub url: String,
    pub basic_auth: String,
}
