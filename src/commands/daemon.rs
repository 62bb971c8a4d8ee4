//! Delivery daemon
//!
//! Manages the nudge daemon that watches agent mailboxes and injects wake
//! prompts into idle target processes.
//!
//! Usage:
//!   nudge daemon start [--socket PATH]   # Fork the daemon into the background
//!   nudge daemon stop [--force]          # Stop the daemon
//!   nudge daemon status                  # Show daemon + per-agent state
//!
//! The daemon respects `.nudge/config.toml`:
//!   [daemon]
//!   poll_interval_ms = 1000     # Supervisor tick interval
//!   sweep_interval_secs = 60    # Acknowledged-signal sweep interval

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{Duration, Instant};

#[cfg(unix)]
use std::os::unix::net::{UnixListener, UnixStream};

use nudge::config::Config;
use nudge::controller::ControllerEvent;
use nudge::signal::SignalStore;
use nudge::supervisor::{self, ControllerSupervisor};
use nudge::target::TargetLauncher;

/// Default socket path (project-specific)
pub fn default_socket_path(dir: &Path) -> PathBuf {
    let project_name = dir
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().and_then(|p| p.file_name()).map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "nudge".to_string());
    PathBuf::from(format!("/tmp/nudge-{}.sock", project_name))
}

/// Path to the daemon state file
pub fn state_file_path(dir: &Path) -> PathBuf {
    dir.join("daemon.json")
}

/// Daemon state stored on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonState {
    pub pid: u32,
    pub socket_path: String,
    pub started_at: String,
}

impl DaemonState {
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = state_file_path(dir);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read daemon state from {:?}", path))?;
        let state: DaemonState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse daemon state from {:?}", path))?;
        Ok(Some(state))
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create nudge directory at {:?}", dir))?;
        }
        let path = state_file_path(dir);
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize daemon state")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write daemon state to {:?}", path))?;
        Ok(())
    }

    pub fn remove(dir: &Path) -> Result<()> {
        let path = state_file_path(dir);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove daemon state at {:?}", path))?;
        }
        Ok(())
    }
}

/// IPC Request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Get daemon status including live controller states
    Status,
    /// Inject a manual inbox-check prompt for one agent
    ForceCheck { agent_id: String },
    /// Shutdown the daemon
    Shutdown,
}

/// IPC Response types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpcResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            ok: false,
            error: Some(msg.to_string()),
            data: None,
        }
    }
}

/// Start the daemon in the background
#[cfg(unix)]
pub fn run_start(dir: &Path, socket_path: Option<&str>, json: bool) -> Result<()> {
    if let Some(state) = DaemonState::load(dir)? {
        if is_process_running(state.pid) {
            if json {
                let output = serde_json::json!({
                    "error": "Daemon already running",
                    "pid": state.pid,
                    "socket": state.socket_path,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Daemon already running (PID {})", state.pid);
                println!("Socket: {}", state.socket_path);
            }
            return Ok(());
        }
        // Stale state, clean up
        DaemonState::remove(dir)?;
    }

    let socket = socket_path
        .map(PathBuf::from)
        .unwrap_or_else(|| default_socket_path(dir));

    if socket.exists() {
        fs::remove_file(&socket)
            .with_context(|| format!("Failed to remove stale socket at {:?}", socket))?;
    }

    let current_exe =
        std::env::current_exe().context("Failed to get current executable path")?;

    let dir_str = dir.to_string_lossy().to_string();
    let socket_str = socket.to_string_lossy().to_string();

    let child = process::Command::new(&current_exe)
        .args([
            "--dir",
            &dir_str,
            "daemon",
            "run",
            "--socket",
            &socket_str,
        ])
        .stdin(process::Stdio::null())
        .stdout(process::Stdio::null())
        .stderr(process::Stdio::null())
        .spawn()
        .context("Failed to spawn daemon process")?;

    let pid = child.id();

    let state = DaemonState {
        pid,
        socket_path: socket_str.clone(),
        started_at: chrono::Utc::now().to_rfc3339(),
    };
    state.save(dir)?;

    // Give the daemon a moment to come up
    std::thread::sleep(Duration::from_millis(200));

    if !is_process_running(pid) {
        DaemonState::remove(dir)?;
        anyhow::bail!("Daemon process exited immediately. Check logs.");
    }

    let config = Config::load(dir).unwrap_or_default();
    if json {
        let output = serde_json::json!({
            "status": "started",
            "pid": pid,
            "socket": socket_str,
            "poll_interval_ms": config.daemon.poll_interval_ms,
            "auto_inject": config.delivery.auto_inject,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Daemon started (PID {})", pid);
        println!("Socket: {}", socket_str);
        println!(
            "Delivery: poll_interval={}ms, auto_inject={}",
            config.daemon.poll_interval_ms, config.delivery.auto_inject
        );
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn run_start(_dir: &Path, _socket_path: Option<&str>, _json: bool) -> Result<()> {
    anyhow::bail!("Daemon is only supported on Unix systems")
}

/// Reap zombie child processes (non-blocking).
///
/// Launched targets become zombies on exit until the parent calls
/// `waitpid`; without this, the pid probe keeps reporting them alive.
#[cfg(unix)]
fn reap_zombies() {
    loop {
        let result = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
        if result <= 0 {
            break;
        }
    }
}

fn log_event(agent_id: &str, event: &ControllerEvent) {
    match event {
        ControllerEvent::Noticed {
            from,
            mode,
            interrupt,
        } => {
            eprintln!(
                "[nudge] {}: signal from '{}' (mode {:?}, interrupt {})",
                agent_id, from, mode, interrupt
            );
        }
        ControllerEvent::Acknowledged => {
            eprintln!("[nudge] {}: acknowledged without injection", agent_id);
        }
        ControllerEvent::Injected { pid, interrupt } => {
            eprintln!(
                "[nudge] {}: injected into PID {} (interrupt {})",
                agent_id, pid, interrupt
            );
        }
        ControllerEvent::GaveUp { rounds } => {
            eprintln!(
                "[nudge] {}: gave up after {} retry rounds, force-acknowledged",
                agent_id, rounds
            );
        }
    }
}

/// Run the daemon loop (called by the forked process)
#[cfg(unix)]
pub fn run_daemon(dir: &Path, socket_path: &str) -> Result<()> {
    let socket = PathBuf::from(socket_path);

    if let Some(parent) = socket.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    if socket.exists() {
        fs::remove_file(&socket)?;
    }

    let listener = UnixListener::bind(&socket)
        .with_context(|| format!("Failed to bind to socket {:?}", socket))?;

    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        fs::set_permissions(&socket, perms)?;
    }

    listener.set_nonblocking(true)?;

    let dir = dir.to_path_buf();
    if !dir.exists() {
        fs::create_dir_all(&dir)?;
    }
    fs::write(supervisor::pid_file_path(&dir), process::id().to_string())
        .context("Failed to write daemon pid file")?;

    let config = Config::load(&dir).unwrap_or_default();
    let poll_interval = Duration::from_millis(config.daemon.poll_interval_ms);
    let sweep_interval = Duration::from_secs(config.daemon.sweep_interval_secs);
    let ttl_secs = config.delivery.signal_ttl_secs;
    let autospawn = config.target.autospawn;

    eprintln!(
        "[nudge] Daemon config: poll_interval={}ms, sweep_interval={}s, auto_inject={}, autospawn={}",
        poll_interval.as_millis(),
        sweep_interval.as_secs(),
        config.delivery.auto_inject,
        autospawn
    );

    let mut supervisor = ControllerSupervisor::new(&dir, &config);
    let mut launcher = TargetLauncher::new(&dir, &config.target);
    let store = SignalStore::new(&dir);

    let mut running = true;
    // Fire both timers immediately on start
    let mut last_tick = Instant::now() - poll_interval;
    let mut last_sweep = Instant::now() - sweep_interval;

    while running {
        reap_zombies();
        for agent_id in launcher.reap() {
            eprintln!("[nudge] {}: target exited", agent_id);
        }

        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(e) = handle_connection(stream, &mut supervisor, &mut running) {
                    eprintln!("[nudge] Error handling connection: {}", e);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                eprintln!("[nudge] Accept error: {}", e);
            }
        }

        if last_tick.elapsed() >= poll_interval {
            last_tick = Instant::now();
            let now = Instant::now();

            if autospawn {
                let bound = supervisor.bound_agents();
                for (agent_id, result) in
                    launcher.ensure_targets(&bound, supervisor.registry_mut(), now)
                {
                    match result {
                        Ok(pid) => eprintln!("[nudge] {}: spawned target PID {}", agent_id, pid),
                        Err(e) => eprintln!("[nudge] {}: spawn failed: {}", agent_id, e),
                    }
                }
            }

            for (agent_id, event) in supervisor.tick(now) {
                log_event(&agent_id, &event);
            }
        }

        if last_sweep.elapsed() >= sweep_interval {
            last_sweep = Instant::now();
            let removed = store.sweep(ttl_secs);
            if removed > 0 {
                eprintln!("[nudge] Swept {} expired signal file(s)", removed);
            }
        }
    }

    // Cleanup
    let _ = fs::remove_file(&socket);
    let _ = fs::remove_file(supervisor::pid_file_path(&dir));
    DaemonState::remove(&dir)?;

    Ok(())
}

#[cfg(not(unix))]
pub fn run_daemon(_dir: &Path, _socket_path: &str) -> Result<()> {
    anyhow::bail!("Daemon is only supported on Unix systems")
}

/// Handle a single IPC connection
#[cfg(unix)]
fn handle_connection(
    stream: UnixStream,
    supervisor: &mut ControllerSupervisor,
    running: &mut bool,
) -> Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;

    let mut write_stream = stream
        .try_clone()
        .context("Failed to clone stream for writing")?;
    let reader = BufReader::new(stream);

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                let response = IpcResponse::error(&format!("Read error: {}", e));
                let _ = write_response(&mut write_stream, &response);
                return Ok(());
            }
        };

        if line.is_empty() {
            continue;
        }

        let request: IpcRequest = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let response = IpcResponse::error(&format!("Invalid request: {}", e));
                write_response(&mut write_stream, &response)?;
                continue;
            }
        };

        let response = handle_request(request, supervisor, running);
        write_response(&mut write_stream, &response)?;

        if !*running {
            break;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn write_response(stream: &mut UnixStream, response: &IpcResponse) -> Result<()> {
    let json = serde_json::to_string(response)?;
    writeln!(stream, "{}", json)?;
    stream.flush()?;
    Ok(())
}

/// Handle an IPC request
fn handle_request(
    request: IpcRequest,
    supervisor: &mut ControllerSupervisor,
    running: &mut bool,
) -> IpcResponse {
    match request {
        IpcRequest::Status => {
            let status = supervisor.status();
            match serde_json::to_value(&status) {
                Ok(value) => IpcResponse::success(value),
                Err(e) => IpcResponse::error(&e.to_string()),
            }
        }
        IpcRequest::ForceCheck { agent_id } => {
            if supervisor.force_check(&agent_id, Instant::now()) {
                IpcResponse::success(serde_json::json!({
                    "agent_id": agent_id,
                    "injected": true,
                }))
            } else {
                IpcResponse::error(&format!(
                    "Could not inject check for '{}' (busy, debounced, or unresolvable)",
                    agent_id
                ))
            }
        }
        IpcRequest::Shutdown => {
            *running = false;
            IpcResponse::success(serde_json::json!({ "status": "shutting_down" }))
        }
    }
}

/// Stop the daemon
#[cfg(unix)]
pub fn run_stop(dir: &Path, force: bool, json: bool) -> Result<()> {
    let state = match DaemonState::load(dir)? {
        Some(s) => s,
        None => {
            if json {
                let output = serde_json::json!({ "error": "Daemon not running" });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Daemon not running");
            }
            return Ok(());
        }
    };

    // Polite shutdown first
    let socket = PathBuf::from(&state.socket_path);
    if socket.exists() {
        if let Ok(mut stream) = UnixStream::connect(&socket) {
            let request = IpcRequest::Shutdown;
            if let Ok(json_req) = serde_json::to_string(&request) {
                let _ = writeln!(stream, "{}", json_req);
                let _ = stream.flush();
            }
            std::thread::sleep(Duration::from_millis(200));
        }
    }

    if is_process_running(state.pid) {
        if force {
            kill_process_force(state.pid)?;
        } else {
            kill_process_graceful(state.pid)?;
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    let _ = fs::remove_file(supervisor::pid_file_path(dir));
    DaemonState::remove(dir)?;

    if json {
        let output = serde_json::json!({
            "status": "stopped",
            "pid": state.pid,
            "force": force,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Daemon stopped (PID {})", state.pid);
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn run_stop(_dir: &Path, _force: bool, _json: bool) -> Result<()> {
    anyhow::bail!("Daemon is only supported on Unix systems")
}

/// Show daemon status
#[cfg(unix)]
pub fn run_status(dir: &Path, json: bool) -> Result<()> {
    let state = match DaemonState::load(dir)? {
        Some(s) => s,
        None => {
            if json {
                let output = serde_json::json!({ "status": "not_running" });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Daemon: not running");
            }
            return Ok(());
        }
    };

    if !is_process_running(state.pid) {
        // Stale state, clean up
        DaemonState::remove(dir)?;
        let _ = fs::remove_file(supervisor::pid_file_path(dir));
        if json {
            let output = serde_json::json!({
                "status": "not_running",
                "note": "Cleaned up stale state",
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("Daemon: not running (cleaned up stale state)");
        }
        return Ok(());
    }

    let uptime = chrono::DateTime::parse_from_rfc3339(&state.started_at)
        .map(|started| {
            let duration = chrono::Utc::now().signed_duration_since(started);
            format_duration(duration.num_seconds())
        })
        .unwrap_or_else(|_| "unknown".to_string());

    // Live controller states come over IPC; fall back to the file view
    let live = send_request(dir, IpcRequest::Status).ok().filter(|r| r.ok);

    if json {
        let output = serde_json::json!({
            "status": "running",
            "pid": state.pid,
            "socket": state.socket_path,
            "started_at": state.started_at,
            "uptime": uptime,
            "agents": live.and_then(|r| r.data).unwrap_or(serde_json::Value::Null),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Daemon: running (PID {})", state.pid);
        println!("Socket: {}", state.socket_path);
        println!("Uptime: {}", uptime);
        match live.and_then(|r| r.data) {
            Some(data) => {
                if let Some(agents) = data.get("agents").and_then(|a| a.as_array()) {
                    if agents.is_empty() {
                        println!("Agents: none bound");
                    }
                    for agent in agents {
                        println!(
                            "  {} state={} pending={}",
                            agent["agent_id"].as_str().unwrap_or("?"),
                            agent["state"].as_str().unwrap_or("?"),
                            agent["pending"]
                        );
                    }
                }
            }
            None => println!("Agents: unavailable (IPC failed)"),
        }
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn run_status(_dir: &Path, _json: bool) -> Result<()> {
    anyhow::bail!("Daemon is only supported on Unix systems")
}

/// Format a duration in seconds to human-readable string
fn format_duration(secs: i64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Check if a process is running
#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Send SIGTERM, wait, then SIGKILL
#[cfg(unix)]
fn kill_process_graceful(pid: u32) -> Result<()> {
    let pid_i32 = pid as i32;

    if unsafe { libc::kill(pid_i32, 0) } != 0 {
        return Ok(());
    }

    if unsafe { libc::kill(pid_i32, libc::SIGTERM) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err).context(format!("Failed to send SIGTERM to PID {}", pid));
    }

    for _ in 0..5 {
        std::thread::sleep(Duration::from_secs(1));
        if unsafe { libc::kill(pid_i32, 0) } != 0 {
            return Ok(());
        }
    }

    if unsafe { libc::kill(pid_i32, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err).context(format!("Failed to send SIGKILL to PID {}", pid));
    }

    Ok(())
}

#[cfg(not(unix))]
fn kill_process_graceful(_pid: u32) -> Result<()> {
    anyhow::bail!("Process killing is only supported on Unix systems")
}

/// Send SIGKILL immediately
#[cfg(unix)]
fn kill_process_force(pid: u32) -> Result<()> {
    let pid_i32 = pid as i32;

    if unsafe { libc::kill(pid_i32, 0) } != 0 {
        return Ok(());
    }

    if unsafe { libc::kill(pid_i32, libc::SIGKILL) } != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err).context(format!("Failed to send SIGKILL to PID {}", pid));
    }

    Ok(())
}

#[cfg(not(unix))]
fn kill_process_force(_pid: u32) -> Result<()> {
    anyhow::bail!("Process killing is only supported on Unix systems")
}

/// Send an IPC request to the running daemon
#[cfg(unix)]
pub fn send_request(dir: &Path, request: IpcRequest) -> Result<IpcResponse> {
    let state = DaemonState::load(dir)?.ok_or_else(|| anyhow::anyhow!("Daemon not running"))?;

    let socket = PathBuf::from(&state.socket_path);
    let mut stream = UnixStream::connect(&socket)
        .with_context(|| format!("Failed to connect to daemon at {:?}", socket))?;

    stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;

    let json = serde_json::to_string(&request)?;
    writeln!(stream, "{}", json)?;
    stream.flush()?;

    let reader = BufReader::new(&stream);
    for line in reader.lines() {
        let line = line.context("Failed to read response")?;
        if !line.is_empty() {
            let response: IpcResponse =
                serde_json::from_str(&line).context("Failed to parse response")?;
            return Ok(response);
        }
    }

    anyhow::bail!("No response from daemon")
}

#[cfg(not(unix))]
pub fn send_request(_dir: &Path, _request: IpcRequest) -> Result<IpcResponse> {
    anyhow::bail!("IPC is only supported on Unix systems")
}
