#![cfg(unix)]

use membench_runner::{
    config::{BenchConfig, Namespace},
    executors::LocalExecutor,
    query::QueryId,
    results::{RunResults, STATS_FILE_NAME},
    runner::{QueryOutcome, QueryRunner, RetryPolicy},
    wrapper::ProcessWrapper,
};
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    time::Duration,
};

// writes `id` plus three rows to the file named by the first `.output` line of its input
const FAKE_ENGINE: &str = r#"#!/bin/sh
out=$(sed -n 's/^\.output \(.*\)$/\1/p' | head -n 1)
if [ -n "$out" ]; then
    printf 'id\n1\n2\n3\n' > "$out"
fi
"#;

// engine failing on the first run for every database, uses a marker file next to the database
const FLAKY_ENGINE: &str = r#"#!/bin/sh
marker="$1.failed"
if [ ! -e "$marker" ]; then
    touch "$marker"
    cat > /dev/null
    echo "IO Error: Could not set lock on file" >&2
    exit 1
fi
out=$(sed -n 's/^\.output \(.*\)$/\1/p' | head -n 1)
printf 'id\n' > "$out"
"#;

// stands in for GNU time -v
const FAKE_TIME: &str = r#"#!/bin/sh
shift
"$@"
status=$?
printf '\tCommand being timed: "%s"\n' "$*" >&2
printf '\tMaximum resident set size (kbytes): 4242\n' >&2
exit $status
"#;

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn setup(root: &Path, engine: &str, queries: u32) -> BenchConfig {
    let mut config = BenchConfig::default();
    config.engine = script(root, "duckdb", engine);
    config.queries = queries;
    config.paths.queries = root.join("sql");
    config.paths.output = root.join("results").join("memory");
    config.paths.stats = root.join("results").join("stats");
    config.paths.databases = root.join("databases");
    config.profiler.candidates = vec![script(root, "time", FAKE_TIME)];
    config.retry.backoff_ms = 10;

    fs::create_dir_all(&config.paths.queries).unwrap();
    fs::create_dir_all(&config.paths.databases).unwrap();

    for n in 1..=queries {
        fs::write(
            config.paths.queries.join(format!("query_{n}.sql")),
            format!(".mode csv\n.output results/memory/query_{n}.csv\nSELECT * FROM trips;\n"),
        )
        .unwrap();
    }

    config
}

#[test]
fn full_battery_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), FAKE_ENGINE, 14);
    let namespace: Namespace = "trajectory-based".parse().unwrap();
    assert!(!config.preflight_checks());

    let results = QueryRunner::new(
        &config,
        &namespace,
        LocalExecutor::new(config.retry.timeout()),
        ProcessWrapper::load(&config.profiler),
    )
    .run_queries()
    .unwrap();

    assert_eq!(results.len(), 14);
    for (_, metrics) in results.iter() {
        assert!(metrics.elapsed >= 0.0);
        assert_eq!(metrics.row_count, Some(3));
        assert_eq!(metrics.max_rss_kb, Some(4242));
    }
    assert!(config
        .output_dir(&namespace)
        .join("query_14.csv")
        .is_file());

    let path = results.write(&config.stats_dir(&namespace)).unwrap();
    assert_eq!(
        path,
        dir.path()
            .join("results/stats/trajectory-based")
            .join(STATS_FILE_NAME)
    );
    assert_eq!(RunResults::load(&path).unwrap(), results);
}

#[test]
fn missing_queries_are_left_out() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), FAKE_ENGINE, 5);
    fs::remove_file(config.paths.queries.join("query_2.sql")).unwrap();
    let namespace: Namespace = "points".parse().unwrap();

    let results = QueryRunner::new(
        &config,
        &namespace,
        LocalExecutor::default(),
        ProcessWrapper::new(vec![], vec![]),
    )
    .run_queries()
    .unwrap();

    assert_eq!(results.len(), 4);
    assert!(results.get(QueryId::new(2).unwrap()).is_none());
    assert_eq!(
        results.get(QueryId::new(1).unwrap()).unwrap().max_rss_kb,
        None
    );
    assert!(!config.output_dir(&namespace).join("query_2.csv").exists());
}

#[test]
fn flaky_engine_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let config = setup(dir.path(), FLAKY_ENGINE, 1);
    let namespace: Namespace = "hanoi0.005".parse().unwrap();
    fs::create_dir_all(config.output_dir(&namespace)).unwrap();

    let outcome = QueryRunner::new(
        &config,
        &namespace,
        LocalExecutor::default(),
        ProcessWrapper::load(&config.profiler),
    )
    .with_retry(RetryPolicy {
        max_attempts: Some(5),
        backoff: Duration::from_millis(10),
    })
    .run_query(QueryId::new(1).unwrap())
    .unwrap();

    match outcome {
        QueryOutcome::Completed { metrics, attempts } => {
            assert_eq!(attempts, 2);
            assert_eq!(metrics.row_count, Some(0));
            assert_eq!(metrics.max_rss_kb, Some(4242));
        }
        other => panic!("expected a completed query, got {other:?}"),
    }
}
