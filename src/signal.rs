//! Wake signals and the file-backed signal store
//!
//! Each agent has a depth-1 mailbox at `.nudge/signals/<agent>.json`. A new
//! write overwrites the previous unacknowledged signal (last-write-wins; no
//! queueing). Producers write the file; this subsystem reads it, rewrites it
//! to acknowledge, and deletes it once acknowledged and past a TTL.
//!
//! The store never propagates read errors: a missing, partial, or corrupt
//! file is simply "no signal". The mailbox is lock-free and concurrent
//! external rewrites may race acknowledge; the contract accepts
//! last-write-wins.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// How a recipient is told to retrieve the message content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignalMode {
    /// Inspect an already-injected context block
    #[default]
    Cognitive,
    /// Fetch queued messages through the inbox command
    Inbox,
}

/// One-shot notification requesting an agent's attention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeSignal {
    pub agent_id: String,
    pub from: String,
    pub message: String,
    #[serde(default)]
    pub mode: SignalMode,
    /// RFC 3339 creation timestamp, set by the producer
    pub timestamp: String,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<String>,
    #[serde(default)]
    pub interrupt: bool,
}

impl WakeSignal {
    /// Build an unacknowledged signal stamped with the current time.
    pub fn new(agent_id: &str, from: &str, message: &str, mode: SignalMode) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            from: from.to_string(),
            message: message.to_string(),
            mode,
            timestamp: Utc::now().to_rfc3339(),
            acknowledged: false,
            acknowledged_at: None,
            interrupt: false,
        }
    }

    /// Dedupe key: one per (agent, producer timestamp).
    pub fn key(&self) -> String {
        format!("{}\n{}", self.agent_id, self.timestamp)
    }
}

/// Parse failure inside the store. Collapsed to `None` at the read
/// boundary; kept typed so tests can assert on the failure class.
#[derive(Debug, Error)]
pub enum SignalParseError {
    #[error("signal file unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("signal file malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// File-backed mailbox, one signal file per agent.
#[derive(Debug, Clone)]
pub struct SignalStore {
    signals_dir: PathBuf,
}

impl SignalStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            signals_dir: dir.join("signals"),
        }
    }

    /// Path to one agent's signal file
    pub fn signal_path(&self, agent_id: &str) -> PathBuf {
        self.signals_dir.join(format!("{}.json", agent_id))
    }

    fn try_read(&self, agent_id: &str) -> Result<WakeSignal, SignalParseError> {
        let content = fs::read_to_string(self.signal_path(agent_id))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Read the agent's mailbox. Any I/O or parse failure is "no signal".
    pub fn read(&self, agent_id: &str) -> Option<WakeSignal> {
        self.try_read(agent_id).ok()
    }

    /// Write a signal, overwriting whatever is in the mailbox.
    pub fn write(&self, signal: &WakeSignal) -> anyhow::Result<()> {
        fs::create_dir_all(&self.signals_dir)?;
        let path = self.signal_path(&signal.agent_id);
        let content = serde_json::to_string_pretty(signal)?;

        // Write-to-temp-then-rename so readers never see a partial file
        let temp_path = self.signals_dir.join(format!(".{}.tmp", signal.agent_id));
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &path)?;

        Ok(())
    }

    /// Best-effort acknowledge: rewrite with `acknowledged = true` and the
    /// current time. No-op if the file is gone or unreadable. Idempotent in
    /// observable state (a second call only refreshes `acknowledged_at` on
    /// an already-acknowledged signal, so it refreshes nothing).
    pub fn acknowledge(&self, agent_id: &str) {
        let Some(mut signal) = self.read(agent_id) else {
            return;
        };
        if signal.acknowledged {
            return;
        }
        signal.acknowledged = true;
        signal.acknowledged_at = Some(Utc::now().to_rfc3339());
        let _ = self.write(&signal);
    }

    /// Number of pending (unacknowledged) signals for an agent: 0 or 1.
    pub fn count_pending(&self, agent_id: &str) -> usize {
        match self.read(agent_id) {
            Some(signal) if !signal.acknowledged => 1,
            _ => 0,
        }
    }

    /// Delete signal files that are acknowledged and whose
    /// `acknowledged_at` is older than `ttl_secs`. Returns how many files
    /// were removed.
    pub fn sweep(&self, ttl_secs: u64) -> usize {
        let Ok(entries) = fs::read_dir(&self.signals_dir) else {
            return 0;
        };

        let cutoff = Utc::now() - Duration::seconds(ttl_secs as i64);
        let mut removed = 0;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let expired = fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<WakeSignal>(&c).ok())
                .filter(|s| s.acknowledged)
                .and_then(|s| s.acknowledged_at)
                .and_then(|at| DateTime::parse_from_rfc3339(&at).ok())
                .map(|at| at.with_timezone(&Utc) < cutoff)
                .unwrap_or(false);

            if expired && fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }

        removed
    }
}
