//! Reading request targets for the `--files-from` option
//!
//! Targets are read one per line from any reader. Empty lines and lines
//! starting with `#` are skipped.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

const COMMENT_MARKER: &str = "#";

/// A list of request targets read from a file or stdin
#[derive(Debug, Clone)]
pub(crate) struct FilesFrom {
    pub(crate) targets: Vec<String>,
}

impl FilesFrom {
    /// Create `FilesFrom` from any reader
    pub(crate) fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let lines: Vec<String> = BufReader::new(reader)
            .lines()
            .collect::<Result<Vec<_>, _>>()
            .context("Cannot read lines from reader")?;

        Ok(FilesFrom {
            targets: Self::filter_lines(lines),
        })
    }

    fn filter_lines(lines: Vec<String>) -> Vec<String> {
        lines
            .into_iter()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_MARKER))
            .collect()
    }
}

impl TryFrom<&Path> for FilesFrom {
    type Error = anyhow::Error;

    fn try_from(path: &Path) -> Result<Self, Self::Error> {
        if path == Path::new("-") {
            Self::from_reader(std::io::stdin())
        } else {
            let file = std::fs::File::open(path)
                .with_context(|| format!("Cannot open --files-from file: {}", path.display()))?;
            Self::from_reader(file)
        }
    }
}
