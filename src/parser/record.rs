use crate::parser::geo::GeoInfo;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("failed to parse {field}: '{value}'")]
    Field { field: &'static str, value: String },
}

/// One line of the source access log, as written by the web server.
/// All fields arrive as strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAccessLine {
    pub host: String,
    pub http_x_forwarded_for: String,
    pub time_local: String,
    pub request: String,
    pub status: String,
    pub request_length: String,
    pub bytes_sent: String,
    pub user_agent: String,
    pub request_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "IsoCode")]
    pub iso_code: String,
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Isp {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Organization")]
    pub organization: String,
}

/// The document shipped to the search backend, one per accepted source line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRecord {
    #[serde(rename = "_id", default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub verb: String,
    pub status: i64,
    pub request_bytes: i64,
    pub response_bytes: i64,
    pub response_time: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    pub city: String,
    pub country: Location,
    pub continent: Location,
    pub isp: Isp,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub coordinates: String,
}

impl RawAccessLine {
    /// Decode one source line. A single trailing comma is tolerated.
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let line = line.strip_suffix(',').unwrap_or(line);
        Ok(serde_json::from_str(line)?)
    }

    /// The client address: last entry of the forwarded-for list, trimmed.
    pub fn client_ip(&self) -> &str {
        self.http_x_forwarded_for
            .split(',')
            .next_back()
            .unwrap_or("")
            .trim()
    }

    /// Convert the raw line into an indexable document. Numeric fields that
    /// fail to parse reject the whole line; geographic fields come from the
    /// caller's lookup of [`client_ip`](Self::client_ip).
    pub fn enrich(&self, id: String, geo: GeoInfo) -> Result<AccessRecord, RecordError> {
        let timestamp = DateTime::parse_from_str(&self.time_local, "%d/%b/%Y:%H:%M:%S %z")
            .map_err(|source| RecordError::Timestamp {
                value: self.time_local.clone(),
                source,
            })?
            .with_timezone(&Utc);

        let parts: Vec<&str> = self.request.split(' ').collect();
        let (verb, mut path) = if parts.len() > 2 {
            (parts[0].to_uppercase(), parts[1].to_string())
        } else {
            (String::new(), parts[0].to_string())
        };

        let query = match path.find('?') {
            Some(at) => {
                let raw_query = path[at + 1..].to_string();
                path.truncate(at);
                parse_query_string(&raw_query)
            }
            None => HashMap::new(),
        };

        let status = parse_int("status", &self.status)?;
        let request_bytes = parse_int("request_length", &self.request_length)?;
        let response_bytes = parse_int("bytes_sent", &self.bytes_sent)?;
        let response_secs: f64 =
            self.request_time
                .parse()
                .map_err(|_| RecordError::Field {
                    field: "request_time",
                    value: self.request_time.clone(),
                })?;
        let response_time = (response_secs * 1000.0) as i64;

        Ok(AccessRecord {
            id,
            timestamp: timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            host: self.host.trim().to_lowercase(),
            ip: self.http_x_forwarded_for.to_lowercase(),
            path: path.to_lowercase(),
            query,
            verb,
            status,
            request_bytes,
            response_bytes,
            response_time,
            user_agent: self.user_agent.to_lowercase(),
            city: geo.city,
            country: geo.country,
            continent: geo.continent,
            isp: geo.isp,
            coordinates: geo.coordinates,
        })
    }
}

impl AccessRecord {
    /// Target index for this record: `accesslogs.YYYY.MM.DD` from the UTC
    /// date of the document timestamp.
    pub fn index_name(&self) -> String {
        let date = DateTime::parse_from_rfc3339(&self.timestamp)
            .map(|ts| ts.with_timezone(&Utc).date_naive())
            .unwrap_or_default();
        format!("accesslogs.{}", date.format("%Y.%m.%d"))
    }
}

static ID_SANITIZER: OnceLock<Regex> = OnceLock::new();

/// Deterministic document id: `<filename>:<line>` with every run of
/// non-alphanumeric characters collapsed to a single underscore.
pub fn doc_id(filename: &str, line_number: usize) -> String {
    let sanitizer =
        ID_SANITIZER.get_or_init(|| Regex::new("[^0-9a-zA-Z]+").expect("id sanitizer pattern"));
    sanitizer
        .replace_all(&format!("{}:{}", filename, line_number), "_")
        .into_owned()
}

fn parse_int(field: &'static str, value: &str) -> Result<i64, RecordError> {
    value.parse().map_err(|_| RecordError::Field {
        field,
        value: value.to_string(),
    })
}

fn parse_query_string(query: &str) -> HashMap<String, String> {
    let query = query.replace("\\u0026", "&");
    let mut map = HashMap::new();
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some((key, value)) => {
                let decoded = percent_decode_str(&value.replace('+', " "))
                    .decode_utf8_lossy()
                    .into_owned();
                map.insert(key.to_string(), decoded);
            }
            None => {
                map.insert(pair.to_string(), String::new());
            }
        }
    }
    map
}
