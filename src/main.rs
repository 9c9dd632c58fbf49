use anyhow::Context;
use clap::Parser;
use gdb_session::config::{Capabilities, SessionConfig};
use gdb_session::log::LOGGER_SWITCHER;
use gdb_session::replay::Replay;
use gdb_session::session::SessionBuilder;
use gdb_session::version::Version;
use std::fs::File;
use std::io::{self, BufReader};
use std::sync::{Arc, Mutex};

/// Replay a recorded backend session and print public session events.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Script with JSON lines of notifications and requests, stdin if not set
    script: Option<String>,

    /// Path to session config file (default: ~/.config/gdb-session/session.toml)
    #[clap(long)]
    config: Option<String>,

    /// First line of `gdb --version` output, selects backend capabilities
    #[clap(long)]
    gdb_version: Option<String>,

    /// Request non-stop mode (used with --gdb-version)
    #[clap(long)]
    non_stop: bool,

    /// Disable session logs
    #[clap(long, short)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let logger = env_logger::Logger::from_default_env();
    let filter = logger.filter();
    LOGGER_SWITCHER.switch(logger, filter);
    if args.quiet {
        gdb_session::log::disable();
    }

    let mut config = SessionConfig::from_file(args.config.as_deref()).unwrap_or_default();
    if let Some(banner) = args.gdb_version.as_deref() {
        let version = Version::gdb_parse(banner).unwrap_or_default();
        log::info!(target: "session", "backend version {version}");
        config.capabilities = Capabilities::for_version(version, args.non_stop);
    }

    let sink = Arc::new(Mutex::new(io::stdout()));
    let mut replay = Replay::new(SessionBuilder::new().with_config(config), sink);

    match args.script {
        Some(path) => {
            let file = File::open(&path).with_context(|| format!("open script {path}"))?;
            replay.run(BufReader::new(file))?
        }
        None => replay.run(io::stdin().lock())?,
    }

    Ok(())
}
