//! Suite loading and filtering.
//!
//! A suite file is a JSON array of test items. Names key the reporting sink,
//! so they must be non-empty and unique.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use suiterun_common::TestItem;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("cannot read suite file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid suite definition: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("test #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("duplicate test name '{name}'")]
    DuplicateName { name: String },
}

/// Read and validate the suite at `path`.
pub fn load_suite(path: &Path) -> Result<Vec<TestItem>, SuiteError> {
    let raw = std::fs::read_to_string(path).map_err(|source| SuiteError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let items = parse_suite(&raw)?;
    debug!(path = %path.display(), tests = items.len(), "loaded test suite");
    Ok(items)
}

pub fn parse_suite(raw: &str) -> Result<Vec<TestItem>, SuiteError> {
    let items: Vec<TestItem> = serde_json::from_str(raw)?;
    validate(&items)?;
    Ok(items)
}

pub fn validate(items: &[TestItem]) -> Result<(), SuiteError> {
    let mut seen = HashSet::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        if item.test_name.trim().is_empty() {
            return Err(SuiteError::EmptyName { index });
        }
        if !seen.insert(item.test_name.as_str()) {
            return Err(SuiteError::DuplicateName {
                name: item.test_name.clone(),
            });
        }
    }
    Ok(())
}

/// Keep the items that apply to `image`. Without an image, everything runs.
pub fn filter_for_image(items: Vec<TestItem>, image: Option<&str>) -> Vec<TestItem> {
    match image {
        Some(image) => items
            .into_iter()
            .filter(|item| item.matches_image(image))
            .collect(),
        None => items,
    }
}
