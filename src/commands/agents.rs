use anyhow::Result;
use std::path::Path;

use nudge::config::Config;
use nudge::supervisor::DiscoverySources;

/// Print the discovered bound-agent union.
pub fn run(dir: &Path, json: bool) -> Result<()> {
    let config = Config::load(dir)?;
    let sources = DiscoverySources::from_dir(dir, config.discovery.default_agent.clone());
    let bound = sources.bound_agents();

    if json {
        let agents: Vec<&String> = bound.iter().collect();
        println!("{}", serde_json::to_string_pretty(&agents)?);
    } else if bound.is_empty() {
        println!("No bound agents");
    } else {
        for agent in &bound {
            println!("{}", agent);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_agents_lists_bindings() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("sessions")).unwrap();
        fs::write(temp.path().join("sessions").join("s1.agent"), "dev1").unwrap();

        run(temp.path(), false).unwrap();
        run(temp.path(), true).unwrap();
    }
}
