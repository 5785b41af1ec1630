use once_cell::sync::Lazy;
use regex::Regex;

// GNU time -v prints e.g. "\tMaximum resident set size (kbytes): 123456"
static MAX_RSS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Maximum resident set size.*?([0-9]+)")
        .unwrap_or_else(|error| panic!("max rss pattern must compile: {error}"))
});

/// Peak resident set size in kilobytes from the diagnostics of a profiled run
///
/// The first line mentioning the maximum resident set size and carrying a number decides the
/// result. Returns None if there is no such line or its number does not fit.
pub fn parse_max_rss(stderr: &str) -> Option<u64> {
    stderr
        .lines()
        .find_map(|line| MAX_RSS.captures(line))
        .and_then(|captures| captures.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}
