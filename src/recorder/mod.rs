//! Debug snapshots of script runs and the retention sweep that prunes them.

use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info};

use crate::compiler::sanitize;
use crate::config::Settings;
use crate::error::Result;
use crate::executor::ExecutionResult;
use crate::template::Language;

const DAY_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugRecord {
    pub timestamp_id: String,
    pub status: &'static str,
    pub source_path: PathBuf,
    pub metadata_path: PathBuf,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordMetadata<'a> {
    script: &'a str,
    status: &'static str,
    recorded_at: String,
    result: &'a ExecutionResult,
}

#[derive(Debug, Clone)]
pub struct DebugRecorder {
    dir: PathBuf,
    save_all: bool,
}

impl DebugRecorder {
    pub fn new(dir: impl Into<PathBuf>, save_all: bool) -> Self {
        Self { dir: dir.into(), save_all }
    }

    pub fn from_settings(settings: &Settings) -> Option<Self> {
        settings
            .debug_enabled
            .then(|| Self::new(&settings.debug_dir, settings.debug_save_all))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn should_record(&self, result: &ExecutionResult) -> bool {
        self.save_all || !result.success
    }

    /// Writes `<ts>_<status>_<name>.<ext>` (`.applescript` or `.js` by
    /// language) and a matching `.json`.
    pub async fn record(
        &self,
        name: &str,
        source: &str,
        language: Language,
        result: &ExecutionResult,
    ) -> Result<Option<DebugRecord>> {
        if !self.should_record(result) {
            return Ok(None);
        }
        tokio::fs::create_dir_all(&self.dir).await?;

        let now: DateTime<Local> = Local::now();
        let timestamp_id = now.format("%Y%m%dT%H%M%S%3f").to_string();
        let status = result.status();
        let stem = format!("{}_{}_{}", timestamp_id, status, sanitize(name));
        let source_path = self.dir.join(format!("{}.{}", stem, language.source_extension()));
        let metadata_path = self.dir.join(format!("{}.json", stem));

        let metadata = RecordMetadata {
            script: name,
            status,
            recorded_at: now.to_rfc3339(),
            result,
        };
        tokio::fs::write(&source_path, source).await?;
        tokio::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?).await?;
        debug!(path = %source_path.display(), "debug record written");

        Ok(Some(DebugRecord { timestamp_id, status, source_path, metadata_path }))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub scanned: usize,
    /// Files deleted, or that would be deleted in a dry run.
    pub deleted: usize,
    pub bytes: u64,
    pub dry_run: bool,
    pub files: Vec<PathBuf>,
}

pub async fn sweep(dir: &Path, retention_days: u64, dry_run: bool) -> Result<SweepReport> {
    let max_age = Duration::from_secs(retention_days.saturating_mul(DAY_SECS));
    sweep_at(dir, max_age, dry_run, SystemTime::now()).await
}

/// Removes regular files in `dir` whose modification age exceeds `max_age`.
pub async fn sweep_at(
    dir: &Path,
    max_age: Duration,
    dry_run: bool,
    now: SystemTime,
) -> Result<SweepReport> {
    let mut report = SweepReport { dry_run, ..SweepReport::default() };
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        report.scanned += 1;

        let modified = meta.modified()?;
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }

        let path = entry.path();
        if !dry_run {
            tokio::fs::remove_file(&path).await?;
        }
        debug!(path = %path.display(), age_days = age.as_secs() / DAY_SECS, dry_run, "expired debug file");
        report.deleted += 1;
        report.bytes += meta.len();
        report.files.push(path);
    }

    report.files.sort();
    info!(
        dir = %dir.display(),
        scanned = report.scanned,
        deleted = report.deleted,
        bytes = report.bytes,
        dry_run,
        "debug sweep finished"
    );
    Ok(report)
}
