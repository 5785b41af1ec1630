use std::{fmt, path::Path, str::FromStr};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a query file name of the form query_<n>.sql")]
pub struct InvalidQueryName(pub String);

/// Index into the query battery, always >= 1
///
/// Orders numerically, so `query_2.sql` sorts before `query_10.sql`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryId(u32);

impl QueryId {
    /// None for 0, identifiers start at 1
    pub fn new(id: u32) -> Option<Self> {
        (id > 0).then_some(Self(id))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// All identifiers of a battery of `count` queries in ascending order
    pub fn battery(count: u32) -> impl Iterator<Item = QueryId> {
        (1..=count).map(Self)
    }

    pub fn sql_file_name(&self) -> String {
        format!("query_{}.sql", self.0)
    }

    pub fn csv_file_name(&self) -> String {
        format!("query_{}.csv", self.0)
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query_{}.sql", self.0)
    }
}

impl FromStr for QueryId {
    type Err = InvalidQueryName;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .strip_prefix("query_")
            .and_then(|rest| rest.strip_suffix(".sql"))
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
            .and_then(Self::new)
            .ok_or_else(|| InvalidQueryName(value.to_owned()))
    }
}

// serde goes through the file name, this keeps the stats file keyed by `query_<n>.sql`
impl serde::Serialize for QueryId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for QueryId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <String as serde::Deserialize>::deserialize(deserializer)?;

        value.parse().map_err(serde::de::Error::custom)
    }
}

/// SQL text of one query with the location its result file is written to left open
#[derive(Debug, Clone)]
pub struct QueryTemplate<'a> {
    sql: String,
    placeholder: &'a str,
    legacy_prefix: Option<&'a str>,
}

impl<'a> QueryTemplate<'a> {
    pub fn new(sql: String, placeholder: &'a str, legacy_prefix: Option<&'a str>) -> Self {
        Self {
            sql,
            placeholder,
            legacy_prefix,
        }
    }

    /// Point the query's output at `output_dir`
    ///
    /// Queries either name the directory through the placeholder or carry the legacy
    /// `.output results/memory/query` prefix, which is rewritten to `.output <output_dir>/query`.
    pub fn render(&self, output_dir: &Path) -> String {
        let output_dir = output_dir.to_string_lossy();
        let legacy_target = format!(".output {output_dir}/query");

        // tokens are only searched in the original text, substituted paths are never rewritten again
        let tokens = [
            (self.placeholder, &*output_dir),
            (self.legacy_prefix.unwrap_or(""), legacy_target.as_str()),
        ];
        let mut sql = String::with_capacity(self.sql.len());
        let mut rest = self.sql.as_str();
        let mut redirected = false;

        while let Some((at, token, replacement)) = tokens
            .iter()
            .filter(|(token, _)| !token.is_empty())
            .filter_map(|(token, replacement)| rest.find(token).map(|at| (at, *token, *replacement)))
            .min_by_key(|(at, _, _)| *at)
        {
            sql.push_str(&rest[..at]);
            sql.push_str(replacement);
            rest = &rest[at + token.len()..];
            redirected = true;
        }
        sql.push_str(rest);

        if !redirected {
            warn!(
                output_dir = %output_dir,
                "Query contains no output location to redirect, results stay where the query puts them"
            );
        }

        sql
    }
}
