use anyhow::Result;
use std::path::Path;

use nudge::signal::{SignalMode, SignalStore, WakeSignal};

/// Drop a wake signal into an agent's mailbox (producer side).
///
/// The mailbox holds at most one signal; a pending signal is overwritten,
/// which is the intended last-write-wins behavior.
pub fn run(
    dir: &Path,
    agent_id: &str,
    from: &str,
    message: &str,
    mode: Option<&str>,
    interrupt: bool,
    json: bool,
) -> Result<()> {
    let mode = match mode {
        None => SignalMode::default(),
        Some("cognitive") => SignalMode::Cognitive,
        Some("inbox") => SignalMode::Inbox,
        Some(other) => anyhow::bail!("Unknown mode '{}' (expected cognitive or inbox)", other),
    };

    let store = SignalStore::new(dir);
    let replaced = store.count_pending(agent_id) > 0;

    let mut signal = WakeSignal::new(agent_id, from, message, mode);
    signal.interrupt = interrupt;
    store.write(&signal)?;

    if json {
        let output = serde_json::json!({
            "agent_id": agent_id,
            "from": from,
            "timestamp": signal.timestamp,
            "interrupt": interrupt,
            "replaced_pending": replaced,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        if replaced {
            println!("Replaced pending signal for '{}'", agent_id);
        }
        println!("Signal queued for '{}' from '{}'", agent_id, from);
    }

    Ok(())
}
