use crate::config::parse::{load_config, ConfigError};
use crate::parser::batch::IndexBatch;
use crate::parser::geo::{GeoError, GeoLookup, GeoResolver};
use crate::parser::session;
use crate::sink::elastic::ElasticClient;
use crate::sink::registry::IndexRegistry;
use crate::source::puller::{Puller, PullerError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info, warn};

const FILE_QUEUE_DEPTH: usize = 4;
const UPLOAD_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("geoip error: {0}")]
    Geo(#[from] GeoError),

    #[error("puller error: {0}")]
    Puller(#[from] PullerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Use --config <path> to specify a config file (default: ./config.json).");
            std::process::exit(1);
        }
    };

    run_pipeline(&config_path).await.map_err(|e| e.into())
}

/// Wire the four stages together and run until the process is terminated:
/// puller -> downloaded-files queue -> parser sessions -> index-files queue
/// -> uploader pool. Startup failures (config, geo database, scratch
/// directories) abort before any stage is spawned.
async fn run_pipeline(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "loading configuration");
    let config = load_config(config_path)?;

    let geo: Arc<dyn GeoLookup> = Arc::new(GeoResolver::open(&config.parser.geoip_db)?);
    info!(db = %config.parser.geoip_db.display(), "opened geoip database");

    std::fs::create_dir_all(&config.parser.tmpdir)?;

    let (file_tx, file_rx) = mpsc::channel::<PathBuf>(FILE_QUEUE_DEPTH);
    let (batch_tx, mut batch_rx) = mpsc::channel::<IndexBatch>(FILE_QUEUE_DEPTH);

    let puller = Puller::new(&config.source)?;
    info!(
        bucket = %config.source.s3.bucket,
        prefix = %config.source.s3.prefix,
        "starting source puller"
    );
    tokio::spawn(async move {
        if let Err(err) = puller.run(file_tx).await {
            error!(error = %err, "source puller exited");
        }
    });

    info!("starting parser");
    let parser_tmpdir = config.parser.tmpdir.clone();
    let batch_max_docs = config.parser.batch_max_docs;
    tokio::spawn(async move {
        session::watch(file_rx, batch_tx, geo, parser_tmpdir, batch_max_docs).await;
    });

    let registry = Arc::new(IndexRegistry::new());
    let client = Arc::new(ElasticClient::new(
        config.elasticsearch.url.clone(),
        config.elasticsearch.basic_auth.clone(),
        registry,
    ));

    info!(url = %config.elasticsearch.url, "starting uploader");
    let uploads = Arc::new(Semaphore::new(UPLOAD_CONCURRENCY));
    while let Some(batch) = batch_rx.recv().await {
        let permit = uploads
            .clone()
            .acquire_owned()
            .await
            .expect("uploader pool closed");
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            let _permit = permit;
            match client.upload(&batch.path, &batch.index).await {
                Ok(()) => {
                    info!(path = %batch.path.display(), "removing uploaded batch");
                    if let Err(err) = tokio::fs::remove_file(&batch.path).await {
                        warn!(
                            path = %batch.path.display(),
                            error = %err,
                            "failed to remove batch file"
                        );
                    }
                }
                Err(err) => {
                    error!(
                        path = %batch.path.display(),
                        index = %batch.index,
                        error = %err,
                        "failed to upload batch"
                    );
                }
            }
        });
    }

    Ok(())
}
