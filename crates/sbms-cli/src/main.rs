//! SBMS CLI entry point

use clap::Parser;
use tracing::{debug, error};

use sbms_cli::{
    cli::{Cli, Commands},
    commands::CommandDispatcher,
    config::{AppConfig, Overrides},
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let overrides = overrides_for(&cli.command);
    let config = match AppConfig::load(cli.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    };
    debug!("Effective configuration: {:?}", config);

    if let Err(e) = CommandDispatcher::execute(cli.command, config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

fn overrides_for(command: &Commands) -> Overrides {
    match command {
        Commands::Relay {
            listen,
            peer,
            inbox,
            dry_run,
        } => Overrides {
            listen: listen.clone(),
            peer: peer.clone(),
            inbox_dir: inbox.clone(),
            dry_run: *dry_run,
        },
        Commands::Send { peer, listen, .. } => Overrides {
            listen: listen.clone(),
            peer: peer.clone(),
            ..Overrides::default()
        },
        _ => Overrides::default(),
    }
}
