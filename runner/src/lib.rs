//! Benchmark harness that runs a numbered battery of SQL queries through a database engine CLI,
//! measures latency and peak memory of every query and stores the results per benchmark run.

pub mod config;
pub mod executors;
pub mod memory;
pub mod query;
pub mod results;
pub mod runner;
pub mod validate;
pub mod wrapper;
