//! Process registry and idle detection
//!
//! Tracks the target processes wake signals can be injected into. Handles
//! are published by the code that owns the process (the launcher); the
//! registry never scrapes a global process table. Each tick the supervisor
//! calls `discover` to prune dead pids and `poll_output` to advance
//! per-pid activity timestamps.
//!
//! Idle means "no qualifying output for the threshold", not "no output at
//! all": only stream-json lines that indicate genuine generation activity
//! (assistant events, in-turn tool traffic) advance the timestamp. System
//! and diagnostic chatter is ambient and ignored.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Zero-signal probe: is the pid alive?
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

/// Does this output line indicate genuine generation activity?
///
/// Qualifying: assistant events, and user events carrying a
/// `parent_tool_use_id` (tool results flowing back mid-turn). System
/// events, results, and anything unparsable are ambient.
pub fn is_activity_marker(line: &str) -> bool {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        return false;
    };
    match value.get("type").and_then(|t| t.as_str()) {
        Some("assistant") => true,
        Some("user") => value
            .get("parent_tool_use_id")
            .map(|p| !p.is_null())
            .unwrap_or(false),
        _ => false,
    }
}

/// One monitored target process.
struct TargetProcess {
    input: Box<dyn Write + Send>,
    output_log: PathBuf,
    /// Byte offset into the output log already scanned
    offset: u64,
    /// Trailing partial line carried between polls
    partial: String,
    /// Last qualifying output; baseline is the publish time
    last_activity: Instant,
}

/// Registry of injectable target processes, keyed by pid.
pub struct ProcessRegistry {
    procs: HashMap<u32, TargetProcess>,
    idle_threshold: Duration,
}

impl ProcessRegistry {
    pub fn new(idle_threshold_ms: u64) -> Self {
        Self {
            procs: HashMap::new(),
            idle_threshold: Duration::from_millis(idle_threshold_ms),
        }
    }

    /// Publish a process handle. First sight records the activity baseline.
    pub fn publish(
        &mut self,
        pid: u32,
        input: Box<dyn Write + Send>,
        output_log: PathBuf,
        now: Instant,
    ) {
        self.procs.entry(pid).or_insert(TargetProcess {
            input,
            output_log,
            offset: 0,
            partial: String::new(),
            last_activity: now,
        });
    }

    /// Prune entries whose pid is no longer alive, dropping all tracked
    /// state immediately so a reused pid number cannot inherit a stale
    /// idle verdict. Idempotent and cheap; runs every tick.
    pub fn discover(&mut self) {
        self.procs.retain(|pid, _| is_alive(*pid));
    }

    /// Tail each output log from its saved offset and advance
    /// `last_activity` for qualifying lines.
    pub fn poll_output(&mut self, now: Instant) {
        for proc in self.procs.values_mut() {
            let Ok(mut file) = File::open(&proc.output_log) else {
                continue;
            };
            let len = file.metadata().map(|m| m.len()).unwrap_or(0);
            if len < proc.offset {
                // Log was truncated; start over
                proc.offset = 0;
                proc.partial.clear();
            }
            if len == proc.offset {
                continue;
            }
            if file.seek(SeekFrom::Start(proc.offset)).is_err() {
                continue;
            }

            let mut chunk = String::new();
            let Ok(read) = file.read_to_string(&mut chunk) else {
                continue;
            };
            proc.offset += read as u64;

            let buffered = format!("{}{}", proc.partial, chunk);
            let mut lines: Vec<&str> = buffered.split('\n').collect();
            // Last element is either "" (chunk ended on a newline) or an
            // incomplete line to carry over
            proc.partial = lines.pop().unwrap_or("").to_string();

            for line in lines {
                if is_activity_marker(line) {
                    proc.last_activity = now;
                }
            }
        }
    }

    /// Idle check. Never-observed pids are assumed idle; observed pids are
    /// idle once the threshold has elapsed since the last qualifying
    /// activity.
    pub fn is_idle(&self, pid: u32, now: Instant) -> bool {
        match self.procs.get(&pid) {
            None => true,
            Some(proc) => now.duration_since(proc.last_activity) >= self.idle_threshold,
        }
    }

    /// Write one newline-terminated record to the process's input stream.
    /// A failed write (closed pipe, exited process) drops the entry and
    /// returns false; it is never an error.
    pub fn write_line(&mut self, pid: u32, line: &str) -> bool {
        let Some(proc) = self.procs.get_mut(&pid) else {
            return false;
        };
        let ok = proc
            .input
            .write_all(line.as_bytes())
            .and_then(|_| proc.input.flush())
            .is_ok();
        if !ok {
            self.procs.remove(&pid);
        }
        ok
    }

    /// The one monitored process, iff exactly one exists.
    pub fn single_candidate(&self) -> Option<u32> {
        if self.procs.len() == 1 {
            self.procs.keys().next().copied()
        } else {
            None
        }
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.procs.contains_key(&pid)
    }

    pub fn pids(&self) -> Vec<u32> {
        self.procs.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }
}
