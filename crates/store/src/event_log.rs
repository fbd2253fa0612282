use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write as _};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use xpush_engine::{CachedCandidate, DeliverySource, FeedbackAction, StrategyOrigin, StrategyStat};

/// One state change in the push ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerRecord {
    Delivered {
        id: u64,
        source: DeliverySource,
    },
    Feedback {
        id: u64,
        action: FeedbackAction,
    },
    StrategyOutcome {
        strategy: StrategyOrigin,
        success: bool,
    },
    /// Absolute counters written by compaction in place of the outcome history.
    StrategySnapshot {
        strategy: StrategyOrigin,
        stat: StrategyStat,
    },
    CandidateCached {
        candidate: CachedCandidate,
    },
    OriginatorScoreAdjusted {
        originator_id: u64,
        delta: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub record: LedgerRecord,
}

impl LedgerEvent {
    pub fn new(record: LedgerRecord) -> Self {
        Self::at(Utc::now(), record)
    }

    pub fn at(occurred_at: DateTime<Utc>, record: LedgerRecord) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at,
            record,
        }
    }
}

/// Newline-delimited JSON file of [`LedgerEvent`]s.
#[derive(Debug, Clone)]
pub struct LedgerLog {
    path: PathBuf,
}

impl LedgerLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, event: &LedgerEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = serde_json::to_string(event)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Replace the whole log.  The events go to a `.tmp` sibling first, which
    /// is synced and then renamed over the live file; the live file is never
    /// left half-written.
    pub async fn overwrite(&self, events: &[LedgerEvent]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = self.sibling("tmp");
        let write_result: Result<()> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            for event in events {
                let line = serde_json::to_string(event)?;
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        Ok(())
    }

    /// Read every event.  Lines that fail to parse are skipped and copied to a
    /// `.corrupt` sidecar.
    pub fn load(&self) -> Result<Vec<LedgerEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = OpenOptions::new().read(true).open(&self.path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut corrupt = Vec::new();

        for (line_idx, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEvent>(&line) {
                Ok(event) => events.push(event),
                Err(err) => {
                    tracing::warn!(
                        line = line_idx + 1,
                        error = %err,
                        path = %self.path.display(),
                        "corrupt ledger line skipped"
                    );
                    corrupt.push(line);
                }
            }
        }

        if !corrupt.is_empty() {
            self.keep_corrupt(&corrupt);
            tracing::warn!(
                corrupt_lines = corrupt.len(),
                path = %self.path.display(),
                "ledger loaded with skipped lines; see .corrupt sidecar"
            );
        }

        Ok(events)
    }

    fn keep_corrupt(&self, lines: &[String]) {
        let sidecar = self.sibling("corrupt");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&sidecar)
            .and_then(|mut file| lines.iter().try_for_each(|line| writeln!(file, "{line}")));
        if let Err(err) = result {
            tracing::warn!(?err, path = %sidecar.display(), "could not write corrupt sidecar");
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let filename = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "ledger.jsonl".to_string());
        self.path.with_file_name(format!("{filename}.{suffix}"))
    }
}
