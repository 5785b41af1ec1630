use crate::query::QueryId;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

pub const STATS_FILE_NAME: &str = "run_queries_memory.json";

#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("Failed to write results to {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to (de)serialize results")]
    Json(#[from] serde_json::Error),
}

/// Measurements of one successful query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMetrics {
    /// wall clock time of the successful attempt in milliseconds
    pub elapsed: f64,
    /// data rows in the result file, None if it was missing
    #[serde(with = "sentinel")]
    pub row_count: Option<u64>,
    /// peak resident set size in kilobytes, None if memory was not measured
    #[serde(with = "sentinel")]
    pub max_rss_kb: Option<u64>,
}

/// Undetermined values are stored as -1 to stay comparable with a legitimate 0
mod sentinel {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => serializer.serialize_u64(*value),
            None => serializer.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        let value = i64::deserialize(deserializer)?;

        Ok(u64::try_from(value).ok())
    }
}

/// Results of one run keyed by query file, iterates in query order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunResults(BTreeMap<QueryId, QueryMetrics>);

impl RunResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a query, an earlier entry for the same query is replaced and returned
    pub fn insert(&mut self, query: QueryId, metrics: QueryMetrics) -> Option<QueryMetrics> {
        self.0.insert(query, metrics)
    }

    pub fn get(&self, query: QueryId) -> Option<&QueryMetrics> {
        self.0.get(&query)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&QueryId, &QueryMetrics)> {
        self.0.iter()
    }

    pub fn load(path: &Path) -> Result<Self, ResultsError> {
        let file = File::open(path).map_err(|source| ResultsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_json::from_reader(io::BufReader::new(file))?)
    }

    /// Write the results as pretty JSON to `dir/run_queries_memory.json`
    ///
    /// Missing directories are created. The file is written next to its final location and
    /// renamed into place, so readers never see a partially written file under the final name.
    pub fn write(&self, dir: &Path) -> Result<PathBuf, ResultsError> {
        let io_error = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| ResultsError::Io { path, source }
        };

        fs::create_dir_all(dir).map_err(io_error(dir))?;

        let path = dir.join(STATS_FILE_NAME);
        let tmp_path = dir.join(format!(".{STATS_FILE_NAME}.tmp"));
        let buffer = serde_json::to_vec_pretty(self)?;

        let mut file = File::create(&tmp_path).map_err(io_error(&tmp_path))?;
        file.write_all(&buffer).map_err(io_error(&tmp_path))?;
        file.sync_all().map_err(io_error(&tmp_path))?;
        drop(file);

        fs::rename(&tmp_path, &path).map_err(io_error(&path))?;
        debug!(path = ?path, entries = self.len(), "Wrote results");

        Ok(path)
    }
}
