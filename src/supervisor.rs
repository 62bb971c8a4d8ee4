//! Controller supervision and bound-agent discovery
//!
//! The supervisor owns every moving part of delivery: the signal store,
//! the process registry, the injection engine, and one controller per
//! bound agent. A single scheduler tick refreshes process discovery,
//! recomputes the bound-agent set, diffs controllers against it, and
//! ticks every survivor.
//!
//! The bound-agent set is the UNION of all discovery sources, not a
//! priority cascade: several simultaneously active sessions are all
//! serviced, alongside the env override, the legacy global binding, and
//! the configured default.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{Config, DeliveryConfig};
use crate::controller::{AgentController, ControllerEvent, TickContext};
use crate::inject::InjectionEngine;
use crate::process::{self, ProcessRegistry};
use crate::signal::SignalStore;

/// Environment override: comma-separated agent ids.
pub const AGENTS_ENV: &str = "NUDGE_AGENTS";

/// Path to the daemon pid file
pub fn pid_file_path(dir: &Path) -> PathBuf {
    dir.join("daemon.pid")
}

/// Probe the daemon pid file. Returns the pid iff the file parses and
/// the process answers a zero-signal probe; no command roundtrip.
pub fn daemon_alive(dir: &Path) -> Option<u32> {
    let content = fs::read_to_string(pid_file_path(dir)).ok()?;
    let pid: u32 = content.trim().parse().ok()?;
    process::is_alive(pid).then_some(pid)
}

/// Where bound agents are discovered from. Paths are explicit so tests
/// can point every source at a temp directory.
pub struct DiscoverySources {
    env_override: Option<String>,
    sessions_dir: PathBuf,
    legacy_file: PathBuf,
    default_agent: Option<String>,
}

impl DiscoverySources {
    pub fn from_dir(dir: &Path, default_agent: Option<String>) -> Self {
        Self {
            env_override: std::env::var(AGENTS_ENV).ok(),
            sessions_dir: dir.join("sessions"),
            legacy_file: dir.join("active-agent"),
            default_agent,
        }
    }

    /// Union of every source. Malformed or empty entries are skipped.
    pub fn bound_agents(&self) -> BTreeSet<String> {
        let mut agents = BTreeSet::new();

        if let Some(raw) = &self.env_override {
            for part in raw.split(',') {
                let part = part.trim();
                if !part.is_empty() {
                    agents.insert(part.to_string());
                }
            }
        }

        // One small plaintext file per active client session
        if let Ok(entries) = fs::read_dir(&self.sessions_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("agent") {
                    continue;
                }
                if let Ok(content) = fs::read_to_string(&path) {
                    let id = content.trim();
                    if !id.is_empty() {
                        agents.insert(id.to_string());
                    }
                }
            }
        }

        // Legacy global fallback file
        if let Ok(content) = fs::read_to_string(&self.legacy_file) {
            let id = content.trim();
            if !id.is_empty() {
                agents.insert(id.to_string());
            }
        }

        if let Some(default) = &self.default_agent {
            agents.insert(default.clone());
        }

        agents
    }
}

/// Per-agent line in the aggregated status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusEntry {
    pub agent_id: String,
    pub state: String,
    pub pending: usize,
}

/// Aggregated view for status display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemon_pid: Option<u32>,
    pub agents: Vec<AgentStatusEntry>,
}

pub struct ControllerSupervisor {
    dir: PathBuf,
    tuning: DeliveryConfig,
    sources: DiscoverySources,
    store: SignalStore,
    registry: ProcessRegistry,
    engine: InjectionEngine,
    controllers: HashMap<String, AgentController>,
}

impl ControllerSupervisor {
    pub fn new(dir: &Path, config: &Config) -> Self {
        Self {
            dir: dir.to_path_buf(),
            sources: DiscoverySources::from_dir(dir, config.discovery.default_agent.clone()),
            store: SignalStore::new(dir),
            registry: ProcessRegistry::new(config.delivery.idle_threshold_ms),
            engine: InjectionEngine::new(config.delivery.debounce_ms),
            controllers: HashMap::new(),
            tuning: config.delivery.clone(),
        }
    }

    pub fn store(&self) -> &SignalStore {
        &self.store
    }

    /// Process-owning code (the launcher) publishes handles through this.
    pub fn registry_mut(&mut self) -> &mut ProcessRegistry {
        &mut self.registry
    }

    pub fn bound_agents(&self) -> BTreeSet<String> {
        self.sources.bound_agents()
    }

    /// Sync controllers with the bound-agent set: create on appear, drop
    /// on disappear (debounce state goes with them).
    fn sync_controllers(&mut self, bound: &BTreeSet<String>) {
        let stale: Vec<String> = self
            .controllers
            .keys()
            .filter(|id| !bound.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            self.controllers.remove(&id);
            self.engine.forget(&id);
        }
        for id in bound {
            self.controllers
                .entry(id.clone())
                .or_insert_with(|| AgentController::new(id));
        }
    }

    /// One scheduler tick. Returns (agent id, event) pairs for logging.
    pub fn tick(&mut self, now: Instant) -> Vec<(String, ControllerEvent)> {
        self.registry.discover();
        self.registry.poll_output(now);

        let bound = self.sources.bound_agents();
        self.sync_controllers(&bound);
        let single_agent = bound.len() == 1;

        let mut ctx = TickContext {
            dir: &self.dir,
            store: &self.store,
            registry: &mut self.registry,
            engine: &mut self.engine,
            tuning: &self.tuning,
            single_agent,
        };

        let mut out = Vec::new();
        for (id, controller) in self.controllers.iter_mut() {
            for event in controller.tick(&mut ctx, now, self.tuning.auto_inject) {
                out.push((id.clone(), event));
            }
        }
        out
    }

    /// Manual inbox-check injection for one agent.
    pub fn force_check(&mut self, agent_id: &str, now: Instant) -> bool {
        let bound = self.sources.bound_agents();
        self.sync_controllers(&bound);
        let single_agent = bound.len() == 1;

        let mut ctx = TickContext {
            dir: &self.dir,
            store: &self.store,
            registry: &mut self.registry,
            engine: &mut self.engine,
            tuning: &self.tuning,
            single_agent,
        };

        match self.controllers.get_mut(agent_id) {
            Some(controller) => controller.force_check(&mut ctx, now),
            None => false,
        }
    }

    /// Aggregate controller states, pending counts, and daemon liveness.
    pub fn status(&self) -> SupervisorStatus {
        let mut agents: Vec<AgentStatusEntry> = self
            .controllers
            .iter()
            .map(|(id, controller)| AgentStatusEntry {
                agent_id: id.clone(),
                state: controller.state().as_str().to_string(),
                pending: self.store.count_pending(id),
            })
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));

        SupervisorStatus {
            daemon_pid: daemon_alive(&self.dir),
            agents,
        }
    }
}

/// File-based status for callers outside the daemon process (no view of
/// live controller state, so states are reported as unknown).
pub fn offline_status(dir: &Path, config: &Config) -> SupervisorStatus {
    let sources = DiscoverySources::from_dir(dir, config.discovery.default_agent.clone());
    let store = SignalStore::new(dir);

    let agents = sources
        .bound_agents()
        .into_iter()
        .map(|agent_id| {
            let pending = store.count_pending(&agent_id);
            AgentStatusEntry {
                agent_id,
                state: "unknown".to_string(),
                pending,
            }
        })
        .collect();

    SupervisorStatus {
        daemon_pid: daemon_alive(dir),
        agents,
    }
}
