//! Heartbeat-based pid resolution
//!
//! Maps an agent id to the target process that belongs to it. The launcher
//! (or any external process owner) writes a heartbeat file per agent at
//! `.nudge/agents/<agent>/heartbeat.json`; this module only reads it.
//!
//! Resolution order:
//! 1. the heartbeat pid, if it is currently monitored;
//! 2. the single monitored candidate, if exactly one process exists and
//!    only one agent is being serviced (single-agent compatibility);
//! 3. nothing — otherwise we refuse to guess, since a wrong pick
//!    delivers one agent's message to another.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::process::ProcessRegistry;

/// Heartbeat record exposing the pid currently associated with an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub pid: u32,
    /// RFC 3339 timestamp of the last update
    pub updated_at: String,
}

impl Heartbeat {
    pub fn new(agent_id: &str, pid: u32) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            pid,
            updated_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Path to one agent's heartbeat file
pub fn heartbeat_path(dir: &Path, agent_id: &str) -> PathBuf {
    dir.join("agents").join(agent_id).join("heartbeat.json")
}

/// Read an agent's heartbeat. Absent or corrupt files are "no heartbeat".
pub fn read_heartbeat(dir: &Path, agent_id: &str) -> Option<Heartbeat> {
    let content = fs::read_to_string(heartbeat_path(dir, agent_id)).ok()?;
    serde_json::from_str(&content).ok()
}

/// Write an agent's heartbeat (launcher side).
pub fn write_heartbeat(dir: &Path, heartbeat: &Heartbeat) -> anyhow::Result<()> {
    let path = heartbeat_path(dir, &heartbeat.agent_id);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string_pretty(heartbeat)?)?;
    Ok(())
}

/// Remove an agent's heartbeat file, if present (launcher side, on exit).
pub fn clear_heartbeat(dir: &Path, agent_id: &str) {
    let _ = fs::remove_file(heartbeat_path(dir, agent_id));
}

/// Resolve the pid for an agent among the monitored processes.
///
/// `single_agent` is true when the caller is servicing exactly one bound
/// agent; only then is the lone-candidate fallback safe, because with
/// several agents sharing one unattributed process the fallback would
/// cross-deliver.
pub fn resolve(
    dir: &Path,
    agent_id: &str,
    registry: &ProcessRegistry,
    single_agent: bool,
) -> Option<u32> {
    if let Some(heartbeat) = read_heartbeat(dir, agent_id) {
        if registry.contains(heartbeat.pid) {
            return Some(heartbeat.pid);
        }
    }
    if single_agent {
        registry.single_candidate()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SharedSink;
    use std::time::Instant;
    use tempfile::TempDir;

    fn registry_with(pids: &[u32], temp: &TempDir) -> ProcessRegistry {
        let mut registry = ProcessRegistry::new(3000);
        for pid in pids {
            registry.publish(
                *pid,
                Box::new(SharedSink::default()),
                temp.path().join(format!("{}.log", pid)),
                Instant::now(),
            );
        }
        registry
    }

    #[test]
    fn test_heartbeat_roundtrip() {
        let temp = TempDir::new().unwrap();
        write_heartbeat(temp.path(), &Heartbeat::new("dev1", 4242)).unwrap();

        let heartbeat = read_heartbeat(temp.path(), "dev1").unwrap();
        assert_eq!(heartbeat.agent_id, "dev1");
        assert_eq!(heartbeat.pid, 4242);
    }

    #[test]
    fn test_missing_or_corrupt_heartbeat_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(read_heartbeat(temp.path(), "dev1").is_none());

        let path = heartbeat_path(temp.path(), "dev1");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{{{").unwrap();
        assert!(read_heartbeat(temp.path(), "dev1").is_none());
    }

    #[test]
    fn test_resolve_prefers_heartbeat_pid() {
        let temp = TempDir::new().unwrap();
        let registry = registry_with(&[100, 200], &temp);
        write_heartbeat(temp.path(), &Heartbeat::new("dev1", 200)).unwrap();

        assert_eq!(resolve(temp.path(), "dev1", &registry, false), Some(200));
    }

    #[test]
    fn test_resolve_falls_back_to_single_candidate() {
        let temp = TempDir::new().unwrap();
        let registry = registry_with(&[100], &temp);

        // No heartbeat at all
        assert_eq!(resolve(temp.path(), "dev1", &registry, true), Some(100));

        // Heartbeat naming a pid that is not monitored
        write_heartbeat(temp.path(), &Heartbeat::new("dev1", 999)).unwrap();
        assert_eq!(resolve(temp.path(), "dev1", &registry, true), Some(100));
    }

    #[test]
    fn test_resolve_no_fallback_with_multiple_agents() {
        let temp = TempDir::new().unwrap();
        let registry = registry_with(&[100], &temp);

        // One unattributed process, several agents: refuse
        assert_eq!(resolve(temp.path(), "dev1", &registry, false), None);
    }

    #[test]
    fn test_resolve_refuses_to_guess_among_many() {
        let temp = TempDir::new().unwrap();
        let registry = registry_with(&[100, 200], &temp);

        assert_eq!(resolve(temp.path(), "dev1", &registry, true), None);

        // A stale heartbeat pointing outside the registry does not help
        write_heartbeat(temp.path(), &Heartbeat::new("dev1", 999)).unwrap();
        assert_eq!(resolve(temp.path(), "dev1", &registry, true), None);
    }

    #[test]
    fn test_resolve_with_no_processes() {
        let temp = TempDir::new().unwrap();
        let registry = ProcessRegistry::new(3000);
        assert_eq!(resolve(temp.path(), "dev1", &registry, true), None);
    }

    #[test]
    fn test_clear_heartbeat() {
        let temp = TempDir::new().unwrap();
        write_heartbeat(temp.path(), &Heartbeat::new("dev1", 1)).unwrap();
        clear_heartbeat(temp.path(), "dev1");
        assert!(read_heartbeat(temp.path(), "dev1").is_none());
        // Clearing again is a no-op
        clear_heartbeat(temp.path(), "dev1");
    }
}
