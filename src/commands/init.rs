use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use nudge::config::Config;

/// Default content for .nudge/.gitignore
const GITIGNORE_CONTENT: &str = r#"# Nudge gitignore
# Target output logs (can be large)
agents/

# Daemon runtime files
daemon.pid
daemon.json

# Transient mailboxes and session bindings
signals/
sessions/
active-agent
"#;

pub fn run(dir: &Path) -> Result<()> {
    if dir.exists() {
        anyhow::bail!("Nudge already initialized at {}", dir.display());
    }

    fs::create_dir_all(dir.join("signals")).context("Failed to create signals directory")?;
    fs::create_dir_all(dir.join("agents")).context("Failed to create agents directory")?;
    fs::create_dir_all(dir.join("sessions")).context("Failed to create sessions directory")?;

    Config::default().save(dir)?;

    fs::write(dir.join(".gitignore"), GITIGNORE_CONTENT).context("Failed to create .gitignore")?;

    println!("Initialized nudge at {}", dir.display());
    Ok(())
}
