//! Per-agent delivery state machine
//!
//! One controller per bound agent, ticked on a fixed cadence by the
//! supervisor. A tick is non-blocking and O(1) in I/O: any wait (for an
//! idle target, for a cooldown to expire) is state, never a suspended
//! call.
//!
//! States: Idle -> Pending -> Cooldown -> {Idle | Pending}. A signal that
//! exhausts its retry budget (`max_attempts` per round times
//! `max_retry_rounds` rounds) is force-acknowledged so delivery does not
//! spin forever; the controller surfaces one `GaveUp` event and returns
//! to Idle so later signals are still serviced.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::DeliveryConfig;
use crate::inject::InjectionEngine;
use crate::payload;
use crate::process::ProcessRegistry;
use crate::resolve;
use crate::signal::{SignalMode, SignalStore, WakeSignal};

/// Dedupe keys kept before `cleanup` purges the set. The set only
/// prevents re-notifying within one daemon run; it never survives
/// restarts.
const MAX_PROCESSED_KEYS: usize = 256;

/// Everything a controller needs for one tick, owned by the supervisor
/// and lent mutably. The registry snapshot and engine are shared across
/// controllers; the debounce table inside the engine is keyed per agent.
pub struct TickContext<'a> {
    pub dir: &'a Path,
    pub store: &'a SignalStore,
    pub registry: &'a mut ProcessRegistry,
    pub engine: &'a mut InjectionEngine,
    pub tuning: &'a DeliveryConfig,
    /// True when exactly one agent is bound (enables the lone-candidate
    /// pid fallback)
    pub single_agent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Pending,
    Cooldown,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Pending => "pending",
            ControllerState::Cooldown => "cooldown",
        }
    }
}

/// What happened during a tick; the supervisor logs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// A new signal was observed in the mailbox
    Noticed {
        from: String,
        mode: SignalMode,
        interrupt: bool,
    },
    /// Auto-injection is off; the signal was acknowledged untouched
    Acknowledged,
    /// The payload reached the target's stdin
    Injected { pid: u32, interrupt: bool },
    /// Retry budget exhausted; the signal was force-acknowledged
    GaveUp { rounds: u32 },
}

pub struct AgentController {
    agent_id: String,
    state: ControllerState,
    current_signal: Option<WakeSignal>,
    attempts: u32,
    retry_rounds: u32,
    last_attempt: Option<Instant>,
    cooldown_until: Option<Instant>,
    processed: HashSet<String>,
}

impl AgentController {
    pub fn new(agent_id: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            state: ControllerState::Idle,
            current_signal: None,
            attempts: 0,
            retry_rounds: 0,
            last_attempt: None,
            cooldown_until: None,
            processed: HashSet::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Invariant check: a signal is held iff we are delivering or waiting
    /// out a backoff with a retry scheduled.
    pub fn has_pending_delivery(&self) -> bool {
        self.current_signal.is_some()
    }

    /// Bound the dedupe set; called before every insert.
    fn cleanup(&mut self) {
        if self.processed.len() > MAX_PROCESSED_KEYS {
            self.processed.clear();
        }
    }

    fn enter_cooldown(&mut self, now: Instant, ms: u64) {
        self.state = ControllerState::Cooldown;
        self.cooldown_until = Some(now + Duration::from_millis(ms));
    }

    /// Drive the state machine one step. Non-blocking; returns the
    /// events the caller should surface.
    pub fn tick(&mut self, ctx: &mut TickContext, now: Instant, auto_inject: bool) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        match self.state {
            ControllerState::Idle => self.tick_idle(ctx, now, auto_inject, &mut events),
            ControllerState::Pending => self.tick_pending(ctx, now, &mut events),
            ControllerState::Cooldown => {
                let expired = self
                    .cooldown_until
                    .map(|until| now >= until)
                    .unwrap_or(true);
                if expired {
                    self.cooldown_until = None;
                    if self.current_signal.is_some() {
                        self.state = ControllerState::Pending;
                        self.tick_pending(ctx, now, &mut events);
                    } else {
                        self.state = ControllerState::Idle;
                        self.tick_idle(ctx, now, auto_inject, &mut events);
                    }
                }
            }
        }
        events
    }

    fn tick_idle(
        &mut self,
        ctx: &mut TickContext,
        now: Instant,
        auto_inject: bool,
        events: &mut Vec<ControllerEvent>,
    ) {
        let Some(signal) = ctx.store.read(&self.agent_id) else {
            return;
        };
        if signal.acknowledged || self.processed.contains(&signal.key()) {
            return;
        }

        self.cleanup();
        self.processed.insert(signal.key());
        events.push(ControllerEvent::Noticed {
            from: signal.from.clone(),
            mode: signal.mode,
            interrupt: signal.interrupt,
        });

        if !auto_inject {
            ctx.store.acknowledge(&self.agent_id);
            events.push(ControllerEvent::Acknowledged);
            return;
        }

        if signal.interrupt {
            // Interrupt signals pre-empt normal gating: one immediate
            // attempt with the idle check skipped. Failure falls through
            // to the normal retry path.
            if let Some(pid) =
                resolve::resolve(ctx.dir, &self.agent_id, ctx.registry, ctx.single_agent)
            {
                let text = payload::build(&signal);
                if ctx
                    .engine
                    .attempt(ctx.registry, pid, &self.agent_id, &text, true, now)
                {
                    ctx.store.acknowledge(&self.agent_id);
                    events.push(ControllerEvent::Injected {
                        pid,
                        interrupt: true,
                    });
                    self.enter_cooldown(now, ctx.tuning.cooldown_ms);
                    return;
                }
            }
        }

        self.current_signal = Some(signal);
        self.attempts = 0;
        self.state = ControllerState::Pending;
        self.tick_pending(ctx, now, events);
    }

    /// Re-read the mailbox and prefer a fresher unacknowledged signal
    /// over the one currently in flight.
    fn refresh_signal(&mut self, ctx: &TickContext, events: &mut Vec<ControllerEvent>) {
        let Some(fresh) = ctx.store.read(&self.agent_id) else {
            return;
        };
        if fresh.acknowledged || self.processed.contains(&fresh.key()) {
            return;
        }
        let same = self
            .current_signal
            .as_ref()
            .map(|s| s.key() == fresh.key())
            .unwrap_or(false);
        if same {
            return;
        }

        self.cleanup();
        self.processed.insert(fresh.key());
        events.push(ControllerEvent::Noticed {
            from: fresh.from.clone(),
            mode: fresh.mode,
            interrupt: fresh.interrupt,
        });
        self.current_signal = Some(fresh);
        self.attempts = 0;
        self.retry_rounds = 0;
    }

    fn tick_pending(
        &mut self,
        ctx: &mut TickContext,
        now: Instant,
        events: &mut Vec<ControllerEvent>,
    ) {
        self.refresh_signal(ctx, events);

        let Some(signal) = self.current_signal.clone() else {
            self.state = ControllerState::Idle;
            return;
        };

        // One attempt per idle-check interval
        if let Some(last) = self.last_attempt {
            if now.duration_since(last) < Duration::from_millis(ctx.tuning.idle_check_interval_ms)
            {
                return;
            }
        }
        self.last_attempt = Some(now);

        let delivered = resolve::resolve(ctx.dir, &self.agent_id, ctx.registry, ctx.single_agent)
            .map(|pid| {
                let text = payload::build(&signal);
                let ok = ctx
                    .engine
                    .attempt(ctx.registry, pid, &self.agent_id, &text, false, now);
                if ok {
                    events.push(ControllerEvent::Injected {
                        pid,
                        interrupt: false,
                    });
                }
                ok
            })
            .unwrap_or(false);

        if delivered {
            ctx.store.acknowledge(&self.agent_id);
            self.current_signal = None;
            self.attempts = 0;
            self.retry_rounds = 0;
            self.enter_cooldown(now, ctx.tuning.cooldown_ms);
            return;
        }

        self.attempts += 1;
        if self.attempts < ctx.tuning.max_attempts {
            return;
        }

        // Round exhausted
        self.attempts = 0;
        self.retry_rounds += 1;
        if self.retry_rounds < ctx.tuning.max_retry_rounds {
            self.enter_cooldown(now, ctx.tuning.retry_backoff_ms);
        } else {
            // Budget spent: force-acknowledge so the mailbox does not
            // spin forever
            ctx.store.acknowledge(&self.agent_id);
            events.push(ControllerEvent::GaveUp {
                rounds: self.retry_rounds,
            });
            self.current_signal = None;
            self.retry_rounds = 0;
            self.state = ControllerState::Idle;
        }
    }

    /// Manual delivery path outside the mailbox flow: one idle-respecting
    /// inbox-check injection. Success enters cooldown.
    pub fn force_check(&mut self, ctx: &mut TickContext, now: Instant) -> bool {
        let Some(pid) = resolve::resolve(ctx.dir, &self.agent_id, ctx.registry, ctx.single_agent)
        else {
            return false;
        };
        let text = payload::build_check(&self.agent_id);
        if ctx
            .engine
            .attempt(ctx.registry, pid, &self.agent_id, &text, false, now)
        {
            self.enter_cooldown(now, ctx.tuning.cooldown_ms);
            true
        } else {
            false
        }
    }
}
