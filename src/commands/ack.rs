use anyhow::Result;
use std::path::Path;

use nudge::signal::SignalStore;

/// Manually acknowledge an agent's pending signal. Idempotent: already
/// acknowledged or missing signals are fine.
pub fn run(dir: &Path, agent_id: &str, json: bool) -> Result<()> {
    let store = SignalStore::new(dir);
    let had_pending = store.count_pending(agent_id) > 0;
    store.acknowledge(agent_id);

    if json {
        let output = serde_json::json!({
            "agent_id": agent_id,
            "acknowledged": had_pending,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if had_pending {
        println!("Acknowledged signal for '{}'", agent_id);
    } else {
        println!("No pending signal for '{}'", agent_id);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge::signal::{SignalMode, WakeSignal};
    use tempfile::TempDir;

    #[test]
    fn test_ack_pending_signal() {
        let temp = TempDir::new().unwrap();
        let store = SignalStore::new(temp.path());
        store
            .write(&WakeSignal::new("dev1", "x", "hi", SignalMode::Cognitive))
            .unwrap();

        run(temp.path(), "dev1", false).unwrap();
        assert!(store.read("dev1").unwrap().acknowledged);
    }

    #[test]
    fn test_ack_missing_is_ok() {
        let temp = TempDir::new().unwrap();
        run(temp.path(), "ghost", false).unwrap();
    }
}
