use crate::{
    config::{BenchConfig, Namespace, RetryConfig},
    executors::Executor,
    memory::parse_max_rss,
    query::{QueryId, QueryTemplate},
    results::{QueryMetrics, RunResults},
    validate::count_rows,
    wrapper::ProcessWrapper,
};
use std::{
    fs, io,
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Failed to read query file {path:?}")]
    ReadQuery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create output directory {path:?}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{query} still failed after {attempts} attempts")]
    RetriesExhausted { query: QueryId, attempts: u32 },
}

/// How often and how fast failed engine runs are repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// None retries until the engine succeeds
    pub max_attempts: Option<u32>,
    /// fixed pause between two attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    /// true if another attempt may follow `attempts` failed ones
    pub fn allows_retry(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: config.backoff(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// the query file does not exist, the engine was not started
    Missing(PathBuf),
    Completed {
        metrics: QueryMetrics,
        attempts: u32,
    },
}

/// Runs the query battery of one namespace, strictly one query after the other
pub struct QueryRunner<'a, E> {
    config: &'a BenchConfig,
    namespace: &'a Namespace,
    executor: E,
    wrapper: ProcessWrapper,
    retry: RetryPolicy,
}

impl<'a, E: Executor> QueryRunner<'a, E> {
    pub fn new(
        config: &'a BenchConfig,
        namespace: &'a Namespace,
        executor: E,
        wrapper: ProcessWrapper,
    ) -> Self {
        Self {
            config,
            namespace,
            executor,
            wrapper,
            retry: RetryPolicy::from(&config.retry),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run a single query until the engine reports success
    ///
    /// Only the successful attempt is timed, failed attempts and the pauses between them are not
    /// part of the reported latency.
    #[instrument(skip(self), fields(namespace = %self.namespace), level = "debug")]
    pub fn run_query(&mut self, query: QueryId) -> Result<QueryOutcome, QueryError> {
        let config = self.config;
        info!("Running {query}");

        let sql_path = config.paths.queries.join(query.sql_file_name());
        if !sql_path.is_file() {
            error!(path = ?sql_path, "Query file not found");
            return Ok(QueryOutcome::Missing(sql_path));
        }

        let sql = fs::read_to_string(&sql_path).map_err(|source| QueryError::ReadQuery {
            path: sql_path.clone(),
            source,
        })?;
        let output_dir = config.output_dir(self.namespace);
        let sql = QueryTemplate::new(
            sql,
            &config.template.placeholder,
            config.template.legacy_prefix.as_deref(),
        )
        .render(&output_dir);

        let (command, measured) = self.wrapper.wrap(vec![
            config.engine.clone().into_os_string(),
            config.database_path(self.namespace).into_os_string(),
        ]);

        let mut attempts: u32 = 0;
        let (output, elapsed) = loop {
            attempts = attempts.saturating_add(1);
            let start = Instant::now();

            match self.executor.execute(&command, &sql) {
                Ok(output) if output.success() => break (output, start.elapsed()),
                Ok(output) => error!(
                    query = %query,
                    attempt = attempts,
                    status = ?output.status,
                    timed_out = output.timed_out,
                    "Error running query: {}",
                    output.stderr.trim_end()
                ),
                Err(e) => error!(query = %query, attempt = attempts, "Failed to run engine: {e}"),
            }

            if !self.retry.allows_retry(attempts) {
                return Err(QueryError::RetriesExhausted { query, attempts });
            }

            warn!(query = %query, attempt = attempts, "Trying again in {:?}", self.retry.backoff);
            thread::sleep(self.retry.backoff);
        };

        let elapsed = elapsed.as_secs_f64() * 1000.0;
        info!(query = %query, elapsed_ms = elapsed, attempts, "Done in {elapsed:.2}ms");

        let max_rss_kb = if measured {
            let max_rss_kb = parse_max_rss(&output.stderr);
            match max_rss_kb {
                Some(kb) => info!(query = %query, max_rss_kb = kb, "Max RSS: {kb} kB"),
                None => warn!(query = %query, "Profiler output carried no maximum resident set size"),
            }
            max_rss_kb
        } else {
            None
        };

        // row counts are informational, a missing result file does not trigger a retry
        let row_count = count_rows(&output_dir.join(query.csv_file_name()));
        match row_count {
            Some(rows) => info!(query = %query, rows, "Output row count: {rows}"),
            None => warn!(query = %query, "Output row count could not be determined"),
        }

        Ok(QueryOutcome::Completed {
            metrics: QueryMetrics {
                elapsed,
                row_count,
                max_rss_kb,
            },
            attempts,
        })
    }

    /// Run every query of the battery in order and collect the completed ones
    ///
    /// Missing query files and queries that exhausted their retries are left out.
    pub fn run_queries(&mut self) -> Result<RunResults, QueryError> {
        let output_dir = self.config.output_dir(self.namespace);
        fs::create_dir_all(&output_dir).map_err(|source| QueryError::OutputDir {
            path: output_dir.clone(),
            source,
        })?;

        let mut results = RunResults::new();
        let mut missing = 0usize;
        let mut failed = 0usize;

        for query in QueryId::battery(self.config.queries) {
            match self.run_query(query) {
                Ok(QueryOutcome::Completed { metrics, .. }) => {
                    results.insert(query, metrics);
                }
                Ok(QueryOutcome::Missing(_)) => missing += 1,
                Err(error) => {
                    error!(query = %query, "Giving up on query: {error}");
                    failed += 1;
                }
            }
        }

        info!(
            recorded = results.len(),
            missing,
            failed,
            "Finished {} queries for {}",
            self.config.queries,
            self.namespace
        );

        Ok(results)
    }
}
