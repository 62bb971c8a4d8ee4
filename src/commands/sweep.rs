use anyhow::Result;
use std::path::Path;

use nudge::config::Config;
use nudge::signal::SignalStore;

/// Manual sweep pass: delete acknowledged signal files past their TTL.
pub fn run(dir: &Path, ttl_secs: Option<u64>, json: bool) -> Result<()> {
    let config = Config::load(dir)?;
    let ttl = ttl_secs.unwrap_or(config.delivery.signal_ttl_secs);

    let removed = SignalStore::new(dir).sweep(ttl);

    if json {
        let output = serde_json::json!({ "removed": removed, "ttl_secs": ttl });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Swept {} expired signal file(s)", removed);
    }

    Ok(())
}
