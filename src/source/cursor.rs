use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt state file '{path}': {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Durable listing position. `marker` is the key the next listing resumes
/// strictly after; `last_date` is the newest key-embedded date seen so far
/// and drives the age filter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cursor {
    pub marker: String,
    pub last_date: NaiveDate,
}

#[derive(Serialize, Deserialize)]
struct CursorState {
    marker: String,
    time: DateTime<Utc>,
}

impl Cursor {
    /// Load the cursor from the state file. A missing file yields the default
    /// cursor (empty marker, epoch date); an unparseable file is an error the
    /// caller treats as fatal.
    pub fn load(path: &Path) -> Result<Self, CursorError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };

        let state: CursorState =
            serde_json::from_str(&contents).map_err(|source| CursorError::Corrupt {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self {
            marker: state.marker,
            last_date: state.time.date_naive(),
        })
    }

    /// Persist the cursor, truncating any previous state.
    pub fn store(&self, path: &Path) -> Result<(), CursorError> {
        let state = CursorState {
            marker: self.marker.clone(),
            time: self.last_date.and_time(NaiveTime::default()).and_utc(),
        };
        let contents = serde_json::to_string(&state).map_err(|source| CursorError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;

        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = TempDir::new().unwrap();

        let cursor = Cursor::load(&dir.path().join("marker.txt")).unwrap();

        assert_eq!(cursor.marker, "");
        assert_eq!(cursor.last_date, NaiveDate::default());
    }

    #[test]
    fn test_store_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker.txt");

        let cursor = Cursor {
            marker: "nginx/access/2015-04-20/host1.log".to_string(),
            last_date: NaiveDate::from_ymd_opt(2015, 4, 20).unwrap(),
        };
        cursor.store(&path).unwrap();

        let loaded = Cursor::load(&path).unwrap();

        assert_eq!(loaded, cursor);
    }

    #[test]
    fn test_state_file_format_is_marker_and_rfc3339_time() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker.txt");

        let cursor = Cursor {
            marker: "k5".to_string(),
            last_date: NaiveDate::from_ymd_opt(2015, 4, 20).unwrap(),
        };
        cursor.store(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

        assert_eq!(raw["marker"], "k5");
        assert_eq!(raw["time"], "2015-04-20T00:00:00Z");
    }

    #[test]
    fn test_corrupt_state_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker.txt");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "not json at all").unwrap();

        let result = Cursor::load(&path);

        assert!(matches!(result, Err(CursorError::Corrupt { .. })));
    }

    #[test]
    fn test_store_overwrites_previous_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker.txt");

        let first = Cursor {
            marker: "a-very-long-marker-key-from-an-earlier-pass".to_string(),
            last_date: NaiveDate::from_ymd_opt(2015, 4, 19).unwrap(),
        };
        first.store(&path).unwrap();

        let second = Cursor {
            marker: "k1".to_string(),
            last_date: NaiveDate::from_ymd_opt(2015, 4, 20).unwrap(),
        };
        second.store(&path).unwrap();

        assert_eq!(Cursor::load(&path).unwrap(), second);
    }
}
