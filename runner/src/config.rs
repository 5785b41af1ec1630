use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::{self, File},
    io::{Error, ErrorKind},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[from] Error),
    #[error("Failed to read config {path:?}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Failed to parse config")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid benchmark namespace '{0}', only [A-Za-z0-9._-] are allowed")]
    InvalidNamespace(String),
    #[error("Preflight checks failed")]
    Preflight,
}

/// Name of one benchmark run, e.g. the storage variant under test.
/// Used as a directory name below the output and stats roots and as the database file stem.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Namespace {
    type Err = ConfigErrors;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let valid = !value.is_empty()
            && value != "."
            && value != ".."
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

        if valid {
            Ok(Self(value.to_owned()))
        } else {
            Err(ConfigErrors::InvalidNamespace(value.to_owned()))
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    // engine binary, receives the SQL on stdin and the database file as its only argument
    #[serde(default = "default_engine")]
    pub engine: PathBuf,
    // number of queries in the battery, i.e. query_1.sql ..= query_{queries}.sql
    #[serde(default = "default_queries")]
    pub queries: u32,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
    #[serde(default)]
    pub template: TemplateConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    #[serde(default = "default_queries_path")]
    pub queries: PathBuf,
    #[serde(default = "default_output_path")]
    pub output: PathBuf,
    #[serde(default = "default_stats_path")]
    pub stats: PathBuf,
    #[serde(default = "default_databases_path")]
    pub databases: PathBuf,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    // None retries until the engine succeeds
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    // per attempt, the child is killed once it is exceeded
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ProfilerConfig {
    // tried in order, the first existing one wraps the engine
    #[serde(default = "default_profilers")]
    pub candidates: Vec<PathBuf>,
    #[serde(default = "default_profiler_args")]
    pub args: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TemplateConfig {
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    #[serde(default = "default_legacy_prefix")]
    pub legacy_prefix: Option<String>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            queries: default_queries(),
            paths: PathsConfig::default(),
            retry: RetryConfig::default(),
            profiler: ProfilerConfig::default(),
            template: TemplateConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            queries: default_queries_path(),
            output: default_output_path(),
            stats: default_stats_path(),
            databases: default_databases_path(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_ms: default_backoff_ms(),
            timeout_ms: None,
        }
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            candidates: default_profilers(),
            args: default_profiler_args(),
        }
    }
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            placeholder: default_placeholder(),
            legacy_prefix: default_legacy_prefix(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl BenchConfig {
    /// Read a YAML config, every missing key falls back to its default
    pub fn from_file(path: &Path) -> Result<Self, ConfigErrors> {
        let contents = fs::read_to_string(path).map_err(|source| match source.kind() {
            ErrorKind::NotFound => ConfigErrors::FileNotFound(path.to_path_buf()),
            _ => ConfigErrors::ReadConfig {
                path: path.to_path_buf(),
                source,
            },
        })?;

        Ok(serde_yaml::from_str(&contents)?)
    }

    pub fn database_path(&self, namespace: &Namespace) -> PathBuf {
        self.paths.databases.join(format!("{namespace}.db"))
    }

    pub fn output_dir(&self, namespace: &Namespace) -> PathBuf {
        self.paths.output.join(namespace.as_str())
    }

    pub fn stats_dir(&self, namespace: &Namespace) -> PathBuf {
        self.paths.stats.join(namespace.as_str())
    }

    /// Report every problem with the configuration before giving up, returns true if any of them
    /// is fatal
    pub fn preflight_checks(&self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if !self.engine.is_file() {
            error!(
                "Engine executable not found at {}. Make sure the engine is built and the path is relative to the working directory",
                self.engine.to_string_lossy()
            );
            contains_error = true;
        } else {
            match check_executable(&self.engine) {
                Ok(true) => {}
                Ok(false) => {
                    error!(
                        "Engine target {} is not executable",
                        self.engine.to_string_lossy()
                    );
                    contains_error = true;
                }
                Err(e) => {
                    error!(
                        "Failed to determine if engine ({}) is an executable: {e}",
                        self.engine.to_string_lossy()
                    );
                    contains_error = true;
                }
            }
        }

        if self.queries == 0 {
            error!("queries cannot be 0, the battery would be empty");
            contains_error = true;
        }

        if self.retry.max_attempts == Some(0) {
            error!("retry.max_attempts cannot be 0, leave it unset to retry without bound");
            contains_error = true;
        }

        if !self.paths.queries.is_dir() {
            warn!(
                "Query directory {} does not exist, every query will be reported as missing",
                self.paths.queries.to_string_lossy()
            );
        }

        if self.profiler.candidates.is_empty() {
            warn!("profiler.candidates is empty, memory will not be measured");
        }

        if self.template.placeholder.is_empty() {
            error!("template.placeholder cannot be empty");
            contains_error = true;
        }

        contains_error
    }
}

fn default_engine() -> PathBuf {
    PathBuf::from("../../build/release/duckdb")
}

fn default_queries() -> u32 {
    14
}

fn default_queries_path() -> PathBuf {
    PathBuf::from("./sql/memory")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("./results/memory")
}

fn default_stats_path() -> PathBuf {
    PathBuf::from("./results/stats")
}

fn default_databases_path() -> PathBuf {
    PathBuf::from("./databases")
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_profilers() -> Vec<PathBuf> {
    // GNU time as installed by homebrew on macOS, then the usual Linux location
    vec![
        PathBuf::from("/usr/local/bin/gtime"),
        PathBuf::from("/usr/bin/time"),
    ]
}

fn default_profiler_args() -> Vec<String> {
    vec!["-v".to_owned()]
}

fn default_placeholder() -> String {
    "{{output_dir}}".to_owned()
}

fn default_legacy_prefix() -> Option<String> {
    Some(".output results/memory/query".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt};

    #[test]
    fn namespace_accepts_filesystem_safe_names() {
        for name in ["hanoi0.005", "points-based", "traj_1"] {
            assert_eq!(name.parse::<Namespace>().unwrap().as_str(), name);
        }
    }

    #[test]
    fn namespace_rejects_paths() {
        for name in ["", ".", "..", "a/b", "../up", "with space"] {
            assert!(
                matches!(name.parse::<Namespace>(), Err(ConfigErrors::InvalidNamespace(_))),
                "expected {name:?} to be rejected"
            );
        }
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: BenchConfig = serde_yaml::from_str("{}").unwrap();

        assert_eq!(config.queries, 14);
        assert_eq!(config.engine, PathBuf::from("../../build/release/duckdb"));
        assert_eq!(config.retry.max_attempts, None);
        assert_eq!(config.retry.backoff(), Duration::from_secs(1));
        assert_eq!(config.profiler.candidates.len(), 2);
        assert_eq!(config.profiler.args, vec!["-v".to_owned()]);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_yaml::from_str::<BenchConfig>("engin: duckdb").is_err());
    }

    #[test]
    fn from_file_reads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("membench.yaml");
        fs::write(&path, "queries: 3\nretry:\n  max_attempts: 2\n").unwrap();

        let config = BenchConfig::from_file(&path).unwrap();
        assert_eq!(config.queries, 3);
        assert_eq!(config.retry.max_attempts, Some(2));
    }

    #[test]
    fn from_file_reports_what_went_wrong() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            BenchConfig::from_file(&dir.path().join("missing.yaml")),
            Err(ConfigErrors::FileNotFound(_))
        ));

        // a directory exists but cannot be read as a config
        match BenchConfig::from_file(dir.path()) {
            Err(ConfigErrors::ReadConfig { path, .. }) => assert_eq!(path, dir.path()),
            other => panic!("expected a read error, got {other:?}"),
        }

        let blocker = dir.path().join("membench.yaml");
        fs::write(&blocker, "").unwrap();
        let err = BenchConfig::from_file(&blocker.join("nested.yaml")).unwrap_err();
        assert!(matches!(err, ConfigErrors::ReadConfig { .. }));
        assert!(err.to_string().contains("nested.yaml"), "{err}");
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config: BenchConfig = serde_yaml::from_str(
            "engine: /opt/duckdb\nqueries: 4\nretry:\n  max_attempts: 3\n",
        )
        .unwrap();

        assert_eq!(config.engine, PathBuf::from("/opt/duckdb"));
        assert_eq!(config.queries, 4);
        assert_eq!(config.retry.max_attempts, Some(3));
        assert_eq!(config.retry.backoff_ms, 1000);
        assert_eq!(config.paths.output, PathBuf::from("./results/memory"));
    }

    #[test]
    fn namespaced_paths() {
        let config = BenchConfig::default();
        let namespace: Namespace = "hanoi".parse().unwrap();

        assert_eq!(
            config.database_path(&namespace),
            PathBuf::from("./databases/hanoi.db")
        );
        assert_eq!(
            config.output_dir(&namespace),
            PathBuf::from("./results/memory/hanoi")
        );
        assert_eq!(
            config.stats_dir(&namespace),
            PathBuf::from("./results/stats/hanoi")
        );
    }

    #[test]
    fn preflight_fails_without_engine() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            engine: dir.path().join("duckdb"),
            ..BenchConfig::default()
        };

        assert!(config.preflight_checks());
    }

    #[test]
    fn preflight_checks_executable_bit() {
        let dir = tempfile::tempdir().unwrap();
        let engine = dir.path().join("duckdb");
        fs::write(&engine, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&engine, fs::Permissions::from_mode(0o644)).unwrap();

        let mut config = BenchConfig {
            engine: engine.clone(),
            ..BenchConfig::default()
        };
        assert!(!check_executable(&engine).unwrap());
        assert!(config.preflight_checks());

        fs::set_permissions(&engine, fs::Permissions::from_mode(0o755)).unwrap();
        assert!(check_executable(&engine).unwrap());
        assert!(!config.preflight_checks());

        config.queries = 0;
        assert!(config.preflight_checks());
    }
}
