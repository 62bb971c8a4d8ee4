//! Injection engine
//!
//! Performs the actual stdin write, gated by the idle check and a
//! per-agent debounce. The debounce table is keyed by agent id, so one
//! agent's delivery never delays another's. Only *successful* injections
//! arm the debounce window; a refused or failed attempt leaves it alone.
//!
//! Every failure mode returns `false` — debounced, target busy, pid
//! unknown, pipe closed. Nothing here is an error the caller must handle.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::payload;
use crate::process::ProcessRegistry;

pub struct InjectionEngine {
    /// agent id -> time of last successful injection
    last_success: HashMap<String, Instant>,
    debounce: Duration,
}

impl InjectionEngine {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            last_success: HashMap::new(),
            debounce: Duration::from_millis(debounce_ms),
        }
    }

    /// Is this agent inside its debounce window?
    pub fn debounced(&self, agent_id: &str, now: Instant) -> bool {
        self.last_success
            .get(agent_id)
            .map(|at| now.duration_since(*at) < self.debounce)
            .unwrap_or(false)
    }

    /// Attempt one injection. Requires the target to be idle unless
    /// `skip_idle_check` (interrupt signals pre-empt normal gating).
    /// Returns whether the payload reached the process's stdin.
    pub fn attempt(
        &mut self,
        registry: &mut ProcessRegistry,
        pid: u32,
        agent_id: &str,
        text: &str,
        skip_idle_check: bool,
        now: Instant,
    ) -> bool {
        if self.debounced(agent_id, now) {
            return false;
        }
        if !skip_idle_check && !registry.is_idle(pid, now) {
            return false;
        }
        if !registry.write_line(pid, &payload::wire_line(text)) {
            return false;
        }
        self.last_success.insert(agent_id.to_string(), now);
        true
    }

    /// Drop debounce state for agents no longer serviced.
    pub fn forget(&mut self, agent_id: &str) {
        self.last_success.remove(agent_id);
    }
}
