//! Target process launcher
//!
//! Spawns interactive target CLI processes (one per agent) with stdin
//! piped for injection and stdout appended to the agent's output log,
//! which the registry tails for idle detection. The launcher writes the
//! agent's heartbeat so resolution can attribute the pid.
//!
//! The daemon owns launched children; externally started targets are
//! attributed through heartbeats alone and never appear here.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Instant;

use crate::config::TargetConfig;
use crate::process::ProcessRegistry;
use crate::resolve::{self, Heartbeat};

/// Flags that put the target CLI into newline-delimited JSON mode on
/// both ends of the pipe.
const STREAM_FLAGS: &[&str] = &[
    "--input-format",
    "stream-json",
    "--output-format",
    "stream-json",
    "--verbose",
];

/// Path to one agent's stdout log
pub fn output_log_path(dir: &Path, agent_id: &str) -> PathBuf {
    dir.join("agents").join(agent_id).join("output.log")
}

pub struct TargetLauncher {
    dir: PathBuf,
    config: TargetConfig,
    children: Vec<(String, Child)>,
}

impl TargetLauncher {
    pub fn new(dir: &Path, config: &TargetConfig) -> Self {
        Self {
            dir: dir.to_path_buf(),
            config: config.clone(),
            children: Vec::new(),
        }
    }

    /// Spawn a target for one agent: stdin piped into the registry,
    /// stdout appended to the agent's output log, heartbeat written.
    /// Returns the child pid.
    pub fn spawn(
        &mut self,
        agent_id: &str,
        registry: &mut ProcessRegistry,
        now: Instant,
    ) -> Result<u32> {
        let log_path = output_log_path(&self.dir, agent_id);
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create agent directory {:?}", parent))?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open output log {:?}", log_path))?;

        let mut child = Command::new(&self.config.command)
            .args(STREAM_FLAGS)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(log)
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn target '{}'", self.config.command))?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .context("Target child has no stdin handle")?;

        registry.publish(pid, Box::new(stdin), log_path, now);
        resolve::write_heartbeat(&self.dir, &Heartbeat::new(agent_id, pid))?;
        self.children.push((agent_id.to_string(), child));
        Ok(pid)
    }

    /// Spawn targets for bound agents with no live heartbeat process.
    /// Spawn failures are reported per agent, never fatal to the loop.
    pub fn ensure_targets(
        &mut self,
        bound: &BTreeSet<String>,
        registry: &mut ProcessRegistry,
        now: Instant,
    ) -> Vec<(String, Result<u32>)> {
        let mut results = Vec::new();
        for agent_id in bound {
            let attributed = resolve::read_heartbeat(&self.dir, agent_id)
                .map(|hb| registry.contains(hb.pid))
                .unwrap_or(false);
            if !attributed {
                results.push((agent_id.clone(), self.spawn(agent_id, registry, now)));
            }
        }
        results
    }

    /// Reap exited children and clear their heartbeats. Returns the
    /// agents whose targets exited. The registry prunes dead pids on its
    /// own discovery pass.
    pub fn reap(&mut self) -> Vec<String> {
        let mut exited = Vec::new();
        self.children.retain_mut(|(agent_id, child)| match child.try_wait() {
            Ok(Some(_)) => {
                resolve::clear_heartbeat(&self.dir, agent_id);
                exited.push(agent_id.clone());
                false
            }
            Ok(None) => true,
            // Wait errors mean the child is already gone
            Err(_) => {
                resolve::clear_heartbeat(&self.dir, agent_id);
                exited.push(agent_id.clone());
                false
            }
        });
        exited
    }

    pub fn running(&self) -> usize {
        self.children.len()
    }
}

impl Drop for TargetLauncher {
    fn drop(&mut self) {
        for (_, child) in &mut self.children {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process;
    use tempfile::TempDir;

    fn cat_launcher(temp: &TempDir) -> TargetLauncher {
        // `cat` blocks on its piped stdin, which is close enough to an
        // interactive target for lifecycle tests
        let config = TargetConfig {
            command: "cat".to_string(),
            args: Vec::new(),
            autospawn: true,
        };
        TargetLauncher::new(temp.path(), &config)
    }

    #[test]
    fn test_spawn_publishes_and_heartbeats() {
        let temp = TempDir::new().unwrap();
        let mut launcher = cat_launcher(&temp);
        let mut registry = ProcessRegistry::new(3000);

        let pid = launcher.spawn("dev1", &mut registry, Instant::now()).unwrap();
        assert!(process::is_alive(pid));
        assert!(registry.contains(pid));
        assert!(output_log_path(temp.path(), "dev1").exists());

        let heartbeat = resolve::read_heartbeat(temp.path(), "dev1").unwrap();
        assert_eq!(heartbeat.pid, pid);
        assert_eq!(launcher.running(), 1);
    }

    #[test]
    fn test_ensure_targets_skips_attributed_agents() {
        let temp = TempDir::new().unwrap();
        let mut launcher = cat_launcher(&temp);
        let mut registry = ProcessRegistry::new(3000);
        let now = Instant::now();

        let bound: BTreeSet<String> = ["dev1".to_string()].into_iter().collect();
        let results = launcher.ensure_targets(&bound, &mut registry, now);
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok());

        // Second pass: the heartbeat pid is monitored, nothing spawns
        let results = launcher.ensure_targets(&bound, &mut registry, now);
        assert!(results.is_empty());
        assert_eq!(launcher.running(), 1);
    }

    #[test]
    fn test_reap_clears_exited_children() {
        let temp = TempDir::new().unwrap();
        let mut launcher = cat_launcher(&temp);
        let mut registry = ProcessRegistry::new(3000);

        let pid = launcher.spawn("dev1", &mut registry, Instant::now()).unwrap();
        assert!(launcher.reap().is_empty());

        unsafe { libc::kill(pid as i32, libc::SIGKILL) };
        // try_wait needs the child to actually exit first
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let mut exited = Vec::new();
        while exited.is_empty() && std::time::Instant::now() < deadline {
            exited = launcher.reap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        assert_eq!(exited, vec!["dev1".to_string()]);
        assert_eq!(launcher.running(), 0);
        assert!(resolve::read_heartbeat(temp.path(), "dev1").is_none());
    }

    #[test]
    fn test_spawn_failure_is_an_error() {
        let temp = TempDir::new().unwrap();
        let config = TargetConfig {
            command: "definitely-not-a-real-command-xyz".to_string(),
            args: Vec::new(),
            autospawn: false,
        };
        let mut launcher = TargetLauncher::new(temp.path(), &config);
        let mut registry = ProcessRegistry::new(3000);
        assert!(launcher.spawn("dev1", &mut registry, Instant::now()).is_err());
    }
}
