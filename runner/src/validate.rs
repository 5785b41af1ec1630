use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};
use tracing::{error, warn};

/// Count the data rows of a CSV result file, assuming exactly one header line
///
/// Returns None if the file does not exist or cannot be read.
pub fn count_rows(path: &Path) -> Option<u64> {
    if !path.is_file() {
        error!(path = ?path, "Output file not found");
        return None;
    }

    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) => {
            warn!(path = ?path, error = ?error, "Failed to open output file");
            return None;
        }
    };

    let mut lines = 0u64;

    for chunk in BufReader::new(file).split(b'\n') {
        if let Err(error) = chunk {
            warn!(path = ?path, error = ?error, "Failed to read output file");
            return None;
        }

        lines += 1;
    }

    Some(lines.saturating_sub(1))
}
