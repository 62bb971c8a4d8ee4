use anyhow::Result;
use std::path::Path;

use nudge::config::Config;
use nudge::supervisor;

/// Quick one-screen overview: daemon liveness, bound agents, pending
/// signal counts. Entirely file-based so it works without the daemon.
pub fn run(dir: &Path, json: bool) -> Result<()> {
    let config = Config::load(dir)?;
    let status = supervisor::offline_status(dir, &config);

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    match status.daemon_pid {
        Some(pid) => println!("Daemon: running (PID {})", pid),
        None => println!("Daemon: not running"),
    }

    if status.agents.is_empty() {
        println!("Agents: none bound");
    } else {
        println!("Agents:");
        for agent in &status.agents {
            let pending = if agent.pending > 0 {
                format!("{} pending", agent.pending)
            } else {
                "no signals".to_string()
            };
            println!("  {} ({})", agent.agent_id, pending);
        }
    }

    Ok(())
}
