use anyhow::Result;
use std::path::Path;

use super::daemon::{self, IpcRequest};

/// Ask the running daemon to inject a manual inbox-check prompt for one
/// agent. Requires the daemon; the injection respects the idle gate and
/// debounce.
pub fn run(dir: &Path, agent_id: &str, json: bool) -> Result<()> {
    let response = daemon::send_request(
        dir,
        IpcRequest::ForceCheck {
            agent_id: agent_id.to_string(),
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if response.ok {
        println!("Check injected for '{}'", agent_id);
    } else {
        anyhow::bail!(
            "Check failed: {}",
            response.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_without_daemon_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(run(temp.path(), "dev1", false).is_err());
    }
}
