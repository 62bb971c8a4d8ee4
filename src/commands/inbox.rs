use anyhow::Result;
use std::path::Path;

use nudge::signal::{SignalStore, WakeSignal};

fn print_signal(signal: &WakeSignal, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(signal)?);
    } else {
        println!("From: {}", signal.from);
        println!("At:   {}", signal.timestamp);
        if signal.interrupt {
            println!("Interrupt: yes");
        }
        if signal.acknowledged {
            println!("Acknowledged: yes");
        }
        println!();
        println!("{}", signal.message);
    }
    Ok(())
}

/// Print the agent's pending signal, the recipient-pull half of inbox
/// mode. Acknowledged signals do not show here; use `recall` for those.
pub fn run(dir: &Path, agent_id: &str, json: bool) -> Result<()> {
    let store = SignalStore::new(dir);
    match store.read(agent_id) {
        Some(signal) if !signal.acknowledged => print_signal(&signal, json),
        _ => {
            if json {
                println!("{}", serde_json::json!({ "agent_id": agent_id, "pending": 0 }));
            } else {
                println!("No pending signals for '{}'", agent_id);
            }
            Ok(())
        }
    }
}

/// Print the last signal regardless of acknowledgement, the recovery path
/// when a delivered context block went missing.
pub fn run_recall(dir: &Path, agent_id: &str, json: bool) -> Result<()> {
    let store = SignalStore::new(dir);
    match store.read(agent_id) {
        Some(signal) => print_signal(&signal, json),
        None => {
            if json {
                println!("{}", serde_json::json!({ "agent_id": agent_id, "signal": null }));
            } else {
                println!("No signal on record for '{}'", agent_id);
            }
            Ok(())
        }
    }
}
