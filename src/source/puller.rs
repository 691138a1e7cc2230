use crate::config::types::SourceConfig;
use crate::source::cursor::{Cursor, CursorError};
use chrono::{DateTime, Days, NaiveDate, Utc};
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectMeta, ObjectStore};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

const STATE_FILE: &str = "marker.txt";
const DOWNLOAD_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum PullerError {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cursor error: {0}")]
    Cursor(#[from] CursorError),

    #[error("invalid key pattern: {0}")]
    KeyPattern(#[from] regex::Error),
}

/// Lists eligible objects under the configured prefix, downloads them with a
/// bounded pool, and emits the local paths on the downloaded-files queue.
/// The listing position survives restarts through the cursor state file.
pub struct Puller {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    tmpdir: PathBuf,
    state_path: PathBuf,
    page_size: usize,
    poll_interval: Duration,
    cursor: Cursor,
    processed: HashMap<String, DateTime<Utc>>,
    key_date: Regex,
}

impl Puller {
    pub fn new(config: &SourceConfig) -> Result<Self, PullerError> {
        let client_options = ClientOptions::new()
            .with_timeout(Duration::from_secs(5))
            .with_connect_timeout(Duration::from_secs(2));

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.s3.bucket)
            .with_access_key_id(&config.s3.access_key)
            .with_secret_access_key(&config.s3.secret_key)
            .with_region(&config.s3.region)
            .with_client_options(client_options);

        if let Some(endpoint) = &config.s3.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if config.s3.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = Arc::new(builder.build()?);

        Self::with_store(
            store,
            &config.s3.prefix,
            &config.tmpdir,
            Path::new(STATE_FILE),
            config.page_size,
            Duration::from_secs(config.poll_interval_seconds),
        )
    }

    /// Build a puller over an already-constructed store. The scratch
    /// directory is created and the cursor restored here, so an uncreatable
    /// tmpdir or a corrupt state file aborts startup.
    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        prefix: &str,
        tmpdir: &Path,
        state_path: &Path,
        page_size: usize,
        poll_interval: Duration,
    ) -> Result<Self, PullerError> {
        std::fs::create_dir_all(tmpdir)?;

        let cursor = Cursor::load(state_path)?;
        info!(
            marker = %cursor.marker,
            last_date = %cursor.last_date,
            "restored listing cursor"
        );

        Ok(Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
            tmpdir: tmpdir.to_path_buf(),
            state_path: state_path.to_path_buf(),
            page_size,
            poll_interval,
            cursor,
            processed: HashMap::new(),
            key_date: key_date_regex(prefix)?,
        })
    }

    /// Infinite listing loop. Each iteration persists the cursor, requests
    /// one page of keys, filters and dispatches downloads, then either
    /// continues from the page's last key or resets the marker and sleeps.
    pub async fn run(mut self, tx: mpsc::Sender<PathBuf>) -> Result<(), PullerError> {
        let downloads = Arc::new(Semaphore::new(DOWNLOAD_CONCURRENCY));
        let (failed_tx, mut failed_rx) = mpsc::unbounded_channel::<String>();

        loop {
            // Failed downloads become eligible again on the next full pass.
            while let Ok(key) = failed_rx.try_recv() {
                self.processed.remove(&key);
            }

            self.cursor.store(&self.state_path)?;
            info!(marker = %self.cursor.marker, "listing objects");

            let page = match self.next_page().await {
                Ok(page) => page,
                Err(err) => {
                    warn!(error = %err, "listing failed, retrying");
                    continue;
                }
            };

            let page_len = page.len();
            let mut last_key = None;

            for meta in page {
                let key = meta.location.to_string();
                last_key = Some(key.clone());

                let Some(captures) = self.key_date.captures(&key) else {
                    warn!(key = %key, modified = %meta.last_modified, "skipping key without embedded date");
                    continue;
                };
                let key_date = match NaiveDate::parse_from_str(&captures["date"], "%Y-%m-%d") {
                    Ok(date) => date,
                    Err(err) => {
                        warn!(key = %key, error = %err, "skipping key with unparseable date");
                        continue;
                    }
                };

                if key_date < self.cursor.last_date - Days::new(1) {
                    info!(key = %key, modified = %meta.last_modified, "skipping key, too old");
                    continue;
                }

                if key_date > self.cursor.last_date {
                    self.cursor.last_date = key_date;
                }

                if self.processed.contains_key(&key) {
                    info!(key = %key, "skipping key, already processed");
                    continue;
                }
                self.processed.insert(key.clone(), Utc::now());

                self.cursor.marker = key.clone();

                let permit = downloads
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("downloader pool closed");
                let store = Arc::clone(&self.store);
                let tmpdir = self.tmpdir.clone();
                let tx = tx.clone();
                let failed = failed_tx.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    match download(store, &tmpdir, &key).await {
                        Ok(local) => {
                            info!(key = %key, path = %local.display(), "queueing downloaded file");
                            if tx.send(local).await.is_err() {
                                warn!(key = %key, "downloaded-files queue closed, dropping file");
                            }
                        }
                        Err(err) => {
                            warn!(key = %key, error = %err, "download failed");
                            let _ = failed.send(key);
                        }
                    }
                });
            }

            if page_len == self.page_size {
                if let Some(key) = last_key {
                    self.cursor.marker = key;
                }
                debug!(marker = %self.cursor.marker, "listing more");
            } else {
                self.cursor.marker = String::new();
                info!(
                    processed = self.processed.len(),
                    last_date = %self.cursor.last_date,
                    "no more objects, sleeping until next pass"
                );
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    /// One listing page: keys strictly after the marker, at most `page_size`.
    async fn next_page(&self) -> Result<Vec<ObjectMeta>, object_store::Error> {
        let offset = ObjectPath::from(self.cursor.marker.as_str());
        let prefix = if self.prefix.is_empty() {
            None
        } else {
            Some(ObjectPath::from(self.prefix.as_str()))
        };

        let mut stream = self.store.list_with_offset(prefix.as_ref(), &offset);
        let mut page = Vec::with_capacity(self.page_size);
        while page.len() < self.page_size {
            match stream.next().await {
                Some(Ok(meta)) => page.push(meta),
                Some(Err(err)) => return Err(err),
                None => break,
            }
        }

        Ok(page)
    }
}

async fn download(
    store: Arc<dyn ObjectStore>,
    tmpdir: &Path,
    key: &str,
) -> Result<PathBuf, PullerError> {
    let local = tmpdir.join(key);
    if let Some(parent) = local.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!(key = %key, path = %local.display(), "downloading");
    let body = store.get(&ObjectPath::from(key)).await?.bytes().await?;
    tokio::fs::write(&local, &body).await?;

    Ok(local)
}

fn key_date_regex(prefix: &str) -> Result<Regex, regex::Error> {
    let prefix = prefix.trim_matches('/');
    let pattern = if prefix.is_empty() {
        r"^/?nginx/access/(?P<date>\d{4}-\d{2}-\d{2})/.+$".to_string()
    } else {
        format!(
            r"^/?{}/nginx/access/(?P<date>\d{{4}}-\d{{2}}-\d{{2}})/.+$",
            regex::escape(prefix)
        )
    };
    Regex::new(&pattern)
}
