#[cfg(feature = "auth")]
mod auth;
mod cli;
mod dashboard;
mod db;
mod error;
mod export;
mod merge;
mod models;
mod server;
mod settings;
mod store;
mod watcher;
mod workbook;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "auth")]
use cli::UserCommands;
use cli::{Cli, Commands};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result: anyhow::Result<()> = match cli.command {
        Commands::Init { data_dir, watch_folder } => cli::init::run(data_dir, watch_folder).map_err(Into::into),
        Commands::Serve {
            host,
            port,
            watch_folder,
            static_dir,
            auth,
        } => cli::serve::run(cli::serve::ServeArgs {
            host,
            port,
            watch_folder,
            static_dir,
            auth,
        }),
        Commands::Ingest { file } => cli::ingest::run(&file).map_err(Into::into),
        Commands::Status => cli::status::run().map_err(Into::into),
        #[cfg(feature = "auth")]
        Commands::User { command } => match command {
            UserCommands::Add { username, name } => cli::user::add(&username, name.as_deref()).map_err(Into::into),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
