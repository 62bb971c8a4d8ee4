use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Bind an agent id to a session (one `.agent` file per session) or to
/// the legacy global `active-agent` file.
pub fn run_bind(dir: &Path, agent_id: &str, session: Option<&str>, global: bool) -> Result<()> {
    if global || session.is_none() {
        fs::create_dir_all(dir).context("Failed to create nudge directory")?;
        fs::write(dir.join("active-agent"), agent_id)
            .context("Failed to write active-agent file")?;
        println!("Bound '{}' globally", agent_id);
        return Ok(());
    }

    let session = session.unwrap_or_default();
    let sessions = dir.join("sessions");
    fs::create_dir_all(&sessions).context("Failed to create sessions directory")?;
    fs::write(sessions.join(format!("{}.agent", session)), agent_id)
        .with_context(|| format!("Failed to write session binding for '{}'", session))?;
    println!("Bound '{}' to session '{}'", agent_id, session);
    Ok(())
}

/// Remove a session binding, or the global binding when no session is
/// given. Missing bindings are not an error.
pub fn run_unbind(dir: &Path, session: Option<&str>) -> Result<()> {
    match session {
        Some(session) => {
            let path = dir.join("sessions").join(format!("{}.agent", session));
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove session binding '{}'", session))?;
                println!("Unbound session '{}'", session);
            } else {
                println!("Session '{}' has no binding", session);
            }
        }
        None => {
            let path = dir.join("active-agent");
            if path.exists() {
                fs::remove_file(&path).context("Failed to remove active-agent file")?;
                println!("Removed global binding");
            } else {
                println!("No global binding");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_session_bind_unbind() {
        let temp = TempDir::new().unwrap();
        run_bind(temp.path(), "dev1", Some("tty1"), false).unwrap();

        let path = temp.path().join("sessions").join("tty1.agent");
        assert_eq!(fs::read_to_string(&path).unwrap(), "dev1");

        run_unbind(temp.path(), Some("tty1")).unwrap();
        assert!(!path.exists());
        // Unbinding again is a no-op
        run_unbind(temp.path(), Some("tty1")).unwrap();
    }

    #[test]
    fn test_global_bind_unbind() {
        let temp = TempDir::new().unwrap();
        run_bind(temp.path(), "dev1", None, true).unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join("active-agent")).unwrap(),
            "dev1"
        );

        run_unbind(temp.path(), None).unwrap();
        assert!(!temp.path().join("active-agent").exists());
    }
}
