//! On-disk crawl history with bounded retention.
//!
//! Layout under the output root:
//!
//! ```text
//! messages/<channel>/messages_<ts>.json   one file per channel per cycle
//! messages/<channel>.json                 cumulative, deduplicated on id
//! bios/bios_<ts>.json                     all bios of one cycle
//! bios.json                               latest bio per channel
//! ```
//!
//! Retention: negative keeps every cycle, zero writes timestamped files
//! only (no cumulative files), N > 0 keeps the newest N timestamped files
//! per directory.
//!
//! Commits are atomic per file: every file of a merge is fully staged as
//! a temp file in its target directory before the first rename happens,
//! so a crash mid-merge never leaves a half-written JSON file at a final
//! path.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use rook_core::error::CrawlError;
use rook_core::record::{ChannelBio, CommitResult, CrawlCycleResult, MessageRecord};
use rook_core::traits::CycleStore;
use tempfile::NamedTempFile;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// File-backed [`CycleStore`].
#[derive(Debug, Clone)]
pub struct FileHistory {
    root: PathBuf,
    retention: i32,
}

impl FileHistory {
    pub fn new(root: impl Into<PathBuf>, retention: i32) -> Self {
        Self {
            root: root.into(),
            retention,
        }
    }

    fn messages_dir(&self) -> PathBuf {
        self.root.join("messages")
    }

    fn bios_dir(&self) -> PathBuf {
        self.root.join("bios")
    }

    /// Cumulative per-channel file: existing history with this cycle's
    /// messages merged in, one entry per message id, newest crawl wins.
    fn merged_channel_messages(
        &self,
        channel: &str,
        fresh: &[&MessageRecord],
    ) -> Vec<MessageRecord> {
        let path = self.messages_dir().join(format!("{channel}.json"));
        let mut by_id: HashMap<u64, MessageRecord> = load_json_or_default::<Vec<MessageRecord>>(&path)
            .into_iter()
            .map(|m| (m.id, m))
            .collect();
        for message in fresh {
            by_id.insert(message.id, (*message).clone());
        }
        let mut merged: Vec<MessageRecord> = by_id.into_values().collect();
        merged.sort_by_key(|m| m.id);
        merged
    }

    /// Cumulative bios file: one live entry per channel.
    fn merged_bios(&self, fresh: &[ChannelBio]) -> Vec<ChannelBio> {
        let path = self.root.join("bios.json");
        let mut bios = load_json_or_default::<Vec<ChannelBio>>(&path);
        for bio in fresh {
            match bios.iter_mut().find(|b| b.channel_id == bio.channel_id) {
                Some(existing) => *existing = bio.clone(),
                None => bios.push(bio.clone()),
            }
        }
        bios
    }

    fn prune(&self, dir: &Path, prefix: &str) -> usize {
        if self.retention <= 0 {
            return 0;
        }
        let keep = self.retention as usize;

        let Ok(entries) = fs::read_dir(dir) else {
            return 0;
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix) && n.ends_with(".json"))
            })
            .collect();
        if files.len() <= keep {
            return 0;
        }

        // Timestamped names sort chronologically; oldest first.
        files.sort();
        let excess = files.len() - keep;
        let mut pruned = 0;
        for path in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => pruned += 1,
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Prune failed"),
            }
        }
        pruned
    }
}

impl CycleStore for FileHistory {
    fn merge(&self, cycle: &CrawlCycleResult) -> Result<CommitResult, CrawlError> {
        let timestamp = cycle
            .finished_at
            .unwrap_or_else(Utc::now)
            .format(TIMESTAMP_FORMAT)
            .to_string();

        let mut by_channel: BTreeMap<&str, Vec<&MessageRecord>> = BTreeMap::new();
        for message in &cycle.messages {
            by_channel
                .entry(message.channel_id.as_str())
                .or_default()
                .push(message);
        }

        // Plan every file of this commit before touching the disk.
        let mut planned: Vec<(PathBuf, String)> = Vec::new();
        for (channel, messages) in &by_channel {
            let channel_dir = self.messages_dir().join(channel);
            planned.push((
                channel_dir.join(format!("messages_{timestamp}.json")),
                to_pretty_json(messages)?,
            ));
            if self.retention != 0 {
                planned.push((
                    self.messages_dir().join(format!("{channel}.json")),
                    to_pretty_json(&self.merged_channel_messages(channel, messages))?,
                ));
            }
        }
        if !cycle.bios.is_empty() {
            planned.push((
                self.bios_dir().join(format!("bios_{timestamp}.json")),
                to_pretty_json(&cycle.bios)?,
            ));
            if self.retention != 0 {
                planned.push((
                    self.root.join("bios.json"),
                    to_pretty_json(&self.merged_bios(&cycle.bios))?,
                ));
            }
        }

        // Stage everything, then publish with renames.
        let mut staged: Vec<(NamedTempFile, PathBuf)> = Vec::new();
        for (path, content) in planned {
            let parent = path
                .parent()
                .ok_or_else(|| CrawlError::PersistenceError(format!(
                    "no parent directory for {}",
                    path.display()
                )))?;
            fs::create_dir_all(parent)?;
            let tmp = NamedTempFile::new_in(parent)?;
            fs::write(tmp.path(), content)?;
            staged.push((tmp, path));
        }

        let mut files_written = 0;
        for (tmp, path) in staged {
            tmp.persist(&path).map_err(|e| {
                CrawlError::PersistenceError(format!("rename to {} failed: {}", path.display(), e))
            })?;
            files_written += 1;
        }

        let mut cycles_pruned = 0;
        for channel in by_channel.keys() {
            cycles_pruned += self.prune(&self.messages_dir().join(channel), "messages_");
        }
        cycles_pruned += self.prune(&self.bios_dir(), "bios_");

        let result = CommitResult {
            files_written,
            cycles_pruned,
            messages_merged: cycle.messages.len(),
            bios_written: cycle.bios.len(),
        };
        tracing::info!(
            files = result.files_written,
            pruned = result.cycles_pruned,
            messages = result.messages_merged,
            bios = result.bios_written,
            "Cycle merged into history"
        );
        Ok(result)
    }
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String, CrawlError> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// A missing or corrupt cumulative file starts a fresh history rather
/// than failing the cycle.
fn load_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> T {
    let Ok(content) = fs::read_to_string(path) else {
        return T::default();
    };
    match serde_json::from_str(&content) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt history file, starting fresh");
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rook_core::testutil::{sample_bio, sample_message};

    fn cycle_at(channel: &str, ids: &[u64], minute: u32) -> CrawlCycleResult {
        let finished = Utc.with_ymd_and_hms(2026, 8, 27, 12, minute, 0).unwrap();
        CrawlCycleResult {
            messages: ids.iter().map(|id| sample_message(channel, *id)).collect(),
            bios: vec![sample_bio(channel)],
            skipped: vec![],
            started_at: Some(finished),
            finished_at: Some(finished),
        }
    }

    fn timestamped_files(dir: &Path, prefix: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(dir) else {
            return vec![];
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.starts_with(prefix))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_merge_writes_timestamped_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path(), 0);

        let result = store.merge(&cycle_at("news", &[1, 2], 0)).unwrap();
        assert_eq!(result.files_written, 2); // messages + bios
        assert_eq!(result.messages_merged, 2);
        assert_eq!(result.bios_written, 1);

        let channel_dir = dir.path().join("messages/news");
        let files = timestamped_files(&channel_dir, "messages_");
        assert_eq!(files, vec!["messages_2026-08-27T12-00-00.json"]);

        let content = fs::read_to_string(channel_dir.join(&files[0])).unwrap();
        let messages: Vec<MessageRecord> = serde_json::from_str(&content).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn test_retention_zero_skips_cumulative_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path(), 0);
        store.merge(&cycle_at("news", &[1], 0)).unwrap();

        assert!(!dir.path().join("messages/news.json").exists());
        assert!(!dir.path().join("bios.json").exists());
    }

    #[test]
    fn test_cumulative_merge_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path(), -1);

        store.merge(&cycle_at("news", &[1, 2], 0)).unwrap();
        store.merge(&cycle_at("news", &[2, 3], 1)).unwrap();
        // Replaying a cycle must not duplicate anything.
        store.merge(&cycle_at("news", &[2, 3], 2)).unwrap();

        let content = fs::read_to_string(dir.path().join("messages/news.json")).unwrap();
        let merged: Vec<MessageRecord> = serde_json::from_str(&content).unwrap();
        let ids: Vec<u64> = merged.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_cumulative_bios_keep_one_entry_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path(), -1);

        store.merge(&cycle_at("news", &[1], 0)).unwrap();
        store.merge(&cycle_at("news", &[2], 1)).unwrap();

        let content = fs::read_to_string(dir.path().join("bios.json")).unwrap();
        let bios: Vec<ChannelBio> = serde_json::from_str(&content).unwrap();
        assert_eq!(bios.len(), 1);
        assert_eq!(bios[0].channel_id, "news");
    }

    #[test]
    fn test_positive_retention_prunes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path(), 2);

        store.merge(&cycle_at("news", &[1], 0)).unwrap();
        store.merge(&cycle_at("news", &[2], 1)).unwrap();
        let result = store.merge(&cycle_at("news", &[3], 2)).unwrap();
        assert!(result.cycles_pruned >= 1);

        let files = timestamped_files(&dir.path().join("messages/news"), "messages_");
        assert_eq!(
            files,
            vec![
                "messages_2026-08-27T12-01-00.json",
                "messages_2026-08-27T12-02-00.json"
            ]
        );
        let bio_files = timestamped_files(&dir.path().join("bios"), "bios_");
        assert_eq!(bio_files.len(), 2);
    }

    #[test]
    fn test_empty_cycle_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path(), -1);

        let result = store.merge(&CrawlCycleResult::default()).unwrap();
        assert_eq!(result, CommitResult::default());
    }

    #[test]
    fn test_corrupt_cumulative_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path(), -1);

        fs::create_dir_all(dir.path().join("messages")).unwrap();
        fs::write(dir.path().join("messages/news.json"), "{not json").unwrap();

        store.merge(&cycle_at("news", &[7], 0)).unwrap();
        let content = fs::read_to_string(dir.path().join("messages/news.json")).unwrap();
        let merged: Vec<MessageRecord> = serde_json::from_str(&content).unwrap();
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_multiple_channels_kept_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileHistory::new(dir.path(), -1);

        let mut cycle = cycle_at("alpha", &[1], 0);
        cycle.messages.push(sample_message("beta", 9));
        cycle.bios.push(sample_bio("beta"));
        store.merge(&cycle).unwrap();

        assert!(dir.path().join("messages/alpha.json").exists());
        assert!(dir.path().join("messages/beta.json").exists());
        let content = fs::read_to_string(dir.path().join("messages/beta.json")).unwrap();
        let merged: Vec<MessageRecord> = serde_json::from_str(&content).unwrap();
        assert_eq!(merged[0].channel_id, "beta");
    }
}
