use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "nudge")]
#[command(about = "Nudge - wake signal delivery for agent processes")]
#[command(version)]
struct Cli {
    /// Path to the nudge directory (default: .nudge in current dir)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Output as JSON for machine consumption
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a nudge directory in the current directory
    Init,

    /// Send a wake signal to an agent
    Send {
        /// Agent ID to wake
        agent: String,

        /// Sender identity
        #[arg(long)]
        from: String,

        /// Message text
        #[arg(long, short = 'm')]
        message: String,

        /// Delivery mode (cognitive, inbox)
        #[arg(long)]
        mode: Option<String>,

        /// Deliver immediately, skipping the idle gate
        #[arg(long)]
        interrupt: bool,
    },

    /// Quick one-screen status overview
    Status,

    /// List discovered bound agents
    Agents,

    /// Bind an agent to a session (or globally)
    Bind {
        /// Agent ID to bind
        agent: String,

        /// Session name (one binding file per session)
        #[arg(long)]
        session: Option<String>,

        /// Bind via the global active-agent file
        #[arg(long)]
        global: bool,
    },

    /// Remove a session binding (or the global binding)
    Unbind {
        /// Session name (omit to clear the global binding)
        #[arg(long)]
        session: Option<String>,
    },

    /// Acknowledge an agent's pending signal
    Ack {
        /// Agent ID
        agent: String,
    },

    /// Show an agent's pending signal
    Inbox {
        /// Agent ID
        agent: String,
    },

    /// Show an agent's last signal, acknowledged or not
    Recall {
        /// Agent ID
        agent: String,
    },

    /// Delete expired acknowledged signal files
    Sweep {
        /// TTL override in seconds (default from config)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Ask the daemon to inject an inbox-check prompt now
    Check {
        /// Agent ID
        agent: String,
    },

    /// Manage the delivery daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },
}

#[derive(Subcommand)]
enum DaemonCommands {
    /// Start the delivery daemon
    Start {
        /// Unix socket path (default: /tmp/nudge-{project}.sock)
        #[arg(long)]
        socket: Option<String>,
    },

    /// Stop the delivery daemon
    Stop {
        /// Force stop (SIGKILL immediately instead of graceful SIGTERM)
        #[arg(long)]
        force: bool,
    },

    /// Show daemon status
    Status,

    /// Run the daemon loop (internal, called by start)
    #[command(hide = true)]
    Run {
        /// Unix socket path
        #[arg(long)]
        socket: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let nudge_dir = cli.dir.unwrap_or_else(|| PathBuf::from(".nudge"));

    match cli.command {
        Commands::Init => commands::init::run(&nudge_dir),
        Commands::Send {
            agent,
            from,
            message,
            mode,
            interrupt,
        } => commands::send::run(
            &nudge_dir,
            &agent,
            &from,
            &message,
            mode.as_deref(),
            interrupt,
            cli.json,
        ),
        Commands::Status => commands::status::run(&nudge_dir, cli.json),
        Commands::Agents => commands::agents::run(&nudge_dir, cli.json),
        Commands::Bind {
            agent,
            session,
            global,
        } => commands::bind::run_bind(&nudge_dir, &agent, session.as_deref(), global),
        Commands::Unbind { session } => commands::bind::run_unbind(&nudge_dir, session.as_deref()),
        Commands::Ack { agent } => commands::ack::run(&nudge_dir, &agent, cli.json),
        Commands::Inbox { agent } => commands::inbox::run(&nudge_dir, &agent, cli.json),
        Commands::Recall { agent } => commands::inbox::run_recall(&nudge_dir, &agent, cli.json),
        Commands::Sweep { ttl_secs } => commands::sweep::run(&nudge_dir, ttl_secs, cli.json),
        Commands::Check { agent } => commands::check::run(&nudge_dir, &agent, cli.json),
        Commands::Daemon { command } => match command {
            DaemonCommands::Start { socket } => {
                commands::daemon::run_start(&nudge_dir, socket.as_deref(), cli.json)
            }
            DaemonCommands::Stop { force } => {
                commands::daemon::run_stop(&nudge_dir, force, cli.json)
            }
            DaemonCommands::Status => commands::daemon::run_status(&nudge_dir, cli.json),
            DaemonCommands::Run { socket } => commands::daemon::run_daemon(&nudge_dir, &socket),
        },
    }
}
