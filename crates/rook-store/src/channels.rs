//! Channel list loading.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use rook_core::error::CrawlError;
use rook_core::traits::ChannelSource;

/// Loads the channel list from a JSON array file, re-read every cycle so
/// edits take effect without a restart.
#[derive(Debug, Clone)]
pub struct FileChannelSource {
    path: PathBuf,
}

impl FileChannelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ChannelSource for FileChannelSource {
    fn load(&self) -> Result<Vec<String>, CrawlError> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            CrawlError::ConfigError(format!(
                "cannot read channels file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        let entries: Vec<serde_json::Value> = serde_json::from_str(&content).map_err(|e| {
            CrawlError::ConfigError(format!(
                "channels file {} is not a JSON array: {}",
                self.path.display(),
                e
            ))
        })?;

        // Malformed entries are skipped, not fatal: one bad edit should
        // not stop the crawl of every other channel.
        let mut seen = HashSet::new();
        let mut channels = Vec::new();
        for entry in entries {
            match entry.as_str().map(str::trim) {
                Some(slug) if !slug.is_empty() => {
                    if seen.insert(slug.to_string()) {
                        channels.push(slug.to_string());
                    }
                }
                _ => {
                    tracing::warn!(?entry, "Skipping malformed channel entry");
                }
            }
        }

        if channels.is_empty() {
            tracing::warn!(path = %self.path.display(), "Channel list is empty");
        }
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn source_with(content: &str) -> (tempfile::TempDir, FileChannelSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.json");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, FileChannelSource::new(path))
    }

    #[test]
    fn test_loads_channel_slugs() {
        let (_dir, source) = source_with(r#"["alpha", "beta"]"#);
        assert_eq!(source.load().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_skips_malformed_entries_and_duplicates() {
        let (_dir, source) = source_with(r#"["alpha", 42, "", null, "alpha", " beta "]"#);
        assert_eq!(source.load().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let source = FileChannelSource::new("/nonexistent/channels.json");
        assert!(matches!(
            source.load(),
            Err(CrawlError::ConfigError(_))
        ));
    }

    #[test]
    fn test_non_array_is_config_error() {
        let (_dir, source) = source_with(r#"{"channels": []}"#);
        assert!(matches!(source.load(), Err(CrawlError::ConfigError(_))));
    }
}
