//! Target-file loading
//!
//! The list of monitored search pages lives in a plain text file, one target
//! per line:
//!
//! ```text
//! # comment
//! https://www.olx.ro/electronice/q-rtx-3060/
//! https://www.vinted.de/catalog?search_text=boots || page_size=20,max_pages=3
//! ```
//!
//! Blank lines and `#` comments are skipped; everything after `||` is a
//! comma-separated `key=value` option list for that target.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::models::TargetSpec;

const OPTIONS_DELIMITER: &str = "||";

const TARGET_FILE_HINT: &str =
    "Add at least one URL to monitor for new ads, one URL per line.";

/// Load target specs from the given file.
///
/// A missing file is created empty and reported as zero targets, so a fresh
/// install degrades to an idle cycle instead of an error.
pub fn load_targets(path: impl AsRef<Path>) -> Result<Vec<TargetSpec>> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            info!(
                "Target file {} not found; creating it. {}",
                path.display(),
                TARGET_FILE_HINT
            );
            std::fs::write(path, "")
                .with_context(|| format!("failed to create target file {}", path.display()))?;
            return Ok(Vec::new());
        }
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read target file {}", path.display()));
        }
    };

    let targets: Vec<TargetSpec> = contents.lines().filter_map(parse_target_line).collect();
    if targets.is_empty() {
        info!("No target URLs configured. {}", TARGET_FILE_HINT);
    }
    Ok(targets)
}

/// Parse one line of the target file; `None` for blanks, comments and
/// malformed lines (which are warned about, not fatal).
pub fn parse_target_line(line: &str) -> Option<TargetSpec> {
    let stripped = line.trim();
    if stripped.is_empty() || stripped.starts_with('#') {
        return None;
    }

    let (url_part, options_part) = match stripped.split_once(OPTIONS_DELIMITER) {
        Some((url, options)) => (url.trim(), Some(options)),
        None => (stripped, None),
    };

    if url_part.is_empty() {
        warn!("Skipping malformed target line (missing URL).");
        return None;
    }

    let mut options = HashMap::new();
    if let Some(options_part) = options_part {
        for pair in options_part.split(',') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                continue;
            }
            options.insert(key.to_string(), value.to_string());
        }
    }

    Some(TargetSpec {
        url: url_part.to_string(),
        options,
    })
}
