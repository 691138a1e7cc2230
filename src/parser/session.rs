use crate::parser::batch::{BatchError, IndexBatch};
use crate::parser::geo::GeoLookup;
use crate::parser::record::{doc_id, AccessRecord, RawAccessLine};
use serde_json::json;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};
use uuid::Uuid;

const PARSER_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("index-files queue closed")]
    QueueClosed,
}

/// Consume downloaded file paths and fan each out to a fresh parser session
/// on a bounded pool. Sessions remove their input file once fully drained.
pub async fn watch(
    mut rx: mpsc::Receiver<PathBuf>,
    output: mpsc::Sender<IndexBatch>,
    geo: Arc<dyn GeoLookup>,
    tmpdir: PathBuf,
    batch_max_docs: usize,
) {
    let workers = Arc::new(Semaphore::new(PARSER_CONCURRENCY));

    while let Some(path) = rx.recv().await {
        let permit = workers
            .clone()
            .acquire_owned()
            .await
            .expect("parser pool closed");
        info!(path = %path.display(), "got downloaded file");

        let session = ParserSession::new(
            tmpdir.clone(),
            batch_max_docs,
            Arc::clone(&geo),
            output.clone(),
        );
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = session.run(&path).await {
                error!(path = %path.display(), error = %err, "failed to parse file");
            }
            if let Err(err) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %err, "failed to remove source file");
            }
        });
    }
}

/// One pass over one downloaded source file. The session exclusively owns
/// its per-index batch map; emitted batches move to the uploader through the
/// output queue.
pub struct ParserSession {
    id: Uuid,
    tmpdir: PathBuf,
    batch_max_docs: usize,
    geo: Arc<dyn GeoLookup>,
    batches: HashMap<String, IndexBatch>,
    output: mpsc::Sender<IndexBatch>,
}

impl ParserSession {
    pub fn new(
        tmpdir: PathBuf,
        batch_max_docs: usize,
        geo: Arc<dyn GeoLookup>,
        output: mpsc::Sender<IndexBatch>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tmpdir,
            batch_max_docs,
            geo,
            batches: HashMap::new(),
            output,
        }
    }

    /// Parse the whole file line by line, then flush and emit every batch.
    /// Lines that fail to decode or parse are logged and skipped.
    pub async fn run(mut self, path: &Path) -> Result<(), SessionError> {
        info!(session = %self.id, path = %path.display(), "parsing file");

        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let filename = path.to_string_lossy().into_owned();

        let mut line_number = 0usize;
        for line in reader.lines() {
            let line = line?;
            line_number += 1;

            let raw = match RawAccessLine::parse(&line) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        line = line_number,
                        error = %err,
                        "skipping undecodable line"
                    );
                    continue;
                }
            };

            let geo = self.geo.lookup(raw.client_ip());
            let record = match raw.enrich(doc_id(&filename, line_number), geo) {
                Ok(record) => record,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        line = line_number,
                        error = %err,
                        "skipping unparseable record"
                    );
                    continue;
                }
            };

            self.store(record).await?;
        }

        self.flush_all().await
    }

    /// Route one record into its index's batch, rolling the batch over when
    /// it already holds more documents than the threshold.
    async fn store(&mut self, record: AccessRecord) -> Result<(), SessionError> {
        let index = record.index_name();

        if self
            .batches
            .get(&index)
            .is_some_and(|batch| batch.docs > self.batch_max_docs)
        {
            if let Some(mut full) = self.batches.remove(&index) {
                info!(
                    index = %index,
                    docs = full.docs,
                    path = %full.path.display(),
                    "rolling over batch file"
                );
                full.flush()?;
                self.output
                    .send(full)
                    .await
                    .map_err(|_| SessionError::QueueClosed)?;
            }
        }

        let session_id = self.id.to_string();
        let batch = match self.batches.entry(index.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(IndexBatch::create(
                &self.tmpdir,
                &index,
                &record.host,
                &session_id,
                self.batch_max_docs,
            )),
        };

        let action = json!({"index": {"_id": record.id}}).to_string();
        let doc = serde_json::to_string(&record)?;
        batch.append(action, doc)?;

        Ok(())
    }

    /// Flush and emit every batch this session accumulated. A batch that
    /// fails to flush is logged and dropped; the rest are still emitted, and
    /// the first failure is reported once all batches were attempted.
    async fn flush_all(&mut self) -> Result<(), SessionError> {
        info!(
            session = %self.id,
            batches = self.batches.len(),
            "flushing parser session"
        );

        let mut first_err = None;
        for (_, mut batch) in self.batches.drain() {
            if let Err(err) = batch.flush() {
                error!(
                    index = %batch.index,
                    path = %batch.path.display(),
                    error = %err,
                    "failed to flush batch file"
                );
                if first_err.is_none() {
                    first_err = Some(err);
                }
                continue;
            }

            info!(
                index = %batch.index,
                docs = batch.docs,
                path = %batch.path.display(),
                "emitting batch file"
            );
            self.output
                .send(batch)
                .await
                .map_err(|_| SessionError::QueueClosed)?;
        }

        match first_err {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
