//! Age-based cleanup of export artifacts.

use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::fs;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub failed: usize,
}

/// Deletes export artifacts older than a retention window.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactRetentionSweeper {
    max_age: Duration,
}

impl ArtifactRetentionSweeper {
    pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Removes every regular file in `directory` last modified more than
    /// `max_age` ago. Failures are logged and counted, never returned.
    pub async fn sweep(&self, directory: &Path) -> SweepReport {
        let mut report = SweepReport::default();
        let mut entries = match fs::read_dir(directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
            Err(e) => {
                tracing::warn!("unable to list {}: {}", directory.display(), e);
                return report;
            }
        };

        let now = SystemTime::now();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("unable to list {}: {}", directory.display(), e);
                    break;
                }
            };
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age <= self.max_age {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    report.removed += 1;
                    tracing::info!("export file was deleted: {}", path.display());
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("unable to delete {}: {}", path.display(), e);
                }
            }
        }
        report
    }
}

impl Default for ArtifactRetentionSweeper {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_AGE)
    }
}
