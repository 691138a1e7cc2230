use chrono::{DateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Append-only bulk payload for a single target index. Document pairs
/// accumulate in memory and are appended to the backing file once the buffer
/// passes the flush threshold or the owning session flushes at end of input.
/// The on-disk file always holds complete lines, so it is a valid bulk
/// payload at any point.
#[derive(Debug)]
pub struct IndexBatch {
    pub index: String,
    pub host: String,
    pub path: PathBuf,
    pub docs: usize,
    pub created: DateTime<Utc>,
    buffer: Vec<String>,
    flush_threshold: usize,
}

impl IndexBatch {
    /// A fresh batch file for `index`, named after the host, index, owning
    /// session, and creation time.
    pub fn create(
        tmpdir: &Path,
        index: &str,
        host: &str,
        session_id: &str,
        flush_threshold: usize,
    ) -> Self {
        let created = Utc::now();
        let file_name = format!(
            "{}_{}_{}_{}.log",
            host.trim().to_lowercase(),
            index,
            session_id,
            created.timestamp()
        );

        Self {
            index: index.to_string(),
            host: host.to_string(),
            path: tmpdir.join(file_name),
            docs: 0,
            created,
            buffer: Vec::new(),
            flush_threshold,
        }
    }

    /// Append one document pair: the bulk action-metadata line and the
    /// document line. The buffer is spilled to disk once it exceeds the
    /// flush threshold.
    pub fn append(&mut self, action_line: String, doc_line: String) -> Result<(), BatchError> {
        self.buffer.push(action_line);
        self.buffer.push(doc_line);
        self.docs += 1;

        if self.buffer.len() > self.flush_threshold {
            self.flush()?;
        }

        Ok(())
    }

    /// Write all buffered lines to the backing file, newline-terminated,
    /// clearing the buffer.
    pub fn flush(&mut self) -> Result<(), BatchError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        for line in &self.buffer {
            writeln!(file, "{}", line)?;
        }
        self.buffer.clear();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pair(n: usize) -> (String, String) {
        (
            format!(r#"{{"index":{{"_id":"doc_{}"}}}}"#, n),
            format!(r#"{{"n":{}}}"#, n),
        )
    }

    #[test]
    fn test_append_buffers_until_threshold() {
        let dir = TempDir::new().unwrap();
        let mut batch = IndexBatch::create(dir.path(), "accesslogs.2015.04.20", "a", "s1", 10);

        for n in 0..5 {
            let (action, doc) = pair(n);
            batch.append(action, doc).unwrap();
        }

        assert_eq!(batch.docs, 5);
        // 10 lines buffered, threshold not exceeded, nothing on disk yet
        assert!(!batch.path.exists());
    }

    #[test]
    fn test_buffer_spills_to_disk_past_threshold() {
        let dir = TempDir::new().unwrap();
        let mut batch = IndexBatch::create(dir.path(), "accesslogs.2015.04.20", "a", "s1", 10);

        for n in 0..6 {
            let (action, doc) = pair(n);
            batch.append(action, doc).unwrap();
        }

        let contents = std::fs::read_to_string(&batch.path).unwrap();
        assert_eq!(contents.lines().count(), 12);
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn test_flush_writes_remainder_and_preserves_order() {
        let dir = TempDir::new().unwrap();
        let mut batch = IndexBatch::create(dir.path(), "accesslogs.2015.04.20", "a", "s1", 4);

        for n in 0..4 {
            let (action, doc) = pair(n);
            batch.append(action, doc).unwrap();
        }
        batch.flush().unwrap();

        let contents = std::fs::read_to_string(&batch.path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines.len(), 8);
        for (i, chunk) in lines.chunks(2).enumerate() {
            assert_eq!(chunk[0], format!(r#"{{"index":{{"_id":"doc_{}"}}}}"#, i));
            assert_eq!(chunk[1], format!(r#"{{"n":{}}}"#, i));
        }
    }

    #[test]
    fn test_payload_alternates_action_and_document() {
        let dir = TempDir::new().unwrap();
        let mut batch = IndexBatch::create(dir.path(), "accesslogs.2015.04.20", "a", "s1", 2);

        for n in 0..7 {
            let (action, doc) = pair(n);
            batch.append(action, doc).unwrap();
        }
        batch.flush().unwrap();

        let contents = std::fs::read_to_string(&batch.path).unwrap();
        for (i, line) in contents.lines().enumerate() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            if i % 2 == 0 {
                assert!(value.get("index").is_some(), "line {} should be an action", i);
            } else {
                assert!(value.get("n").is_some(), "line {} should be a document", i);
            }
        }
    }

    #[test]
    fn test_file_name_embeds_host_index_and_session() {
        let dir = TempDir::new().unwrap();
        let batch = IndexBatch::create(dir.path(), "accesslogs.2015.04.20", " Host-A ", "s1", 10);

        let name = batch.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("host-a_accesslogs.2015.04.20_s1_"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_flush_on_empty_buffer_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let mut batch = IndexBatch::create(dir.path(), "accesslogs.2015.04.20", "a", "s1", 10);

        batch.flush().unwrap();

        assert!(!batch.path.exists());
    }
}
