pub mod ingest;
pub mod init;
pub mod serve;
pub mod status;
#[cfg(feature = "auth")]
pub mod user;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "spendwatch", about = "Contract spend dashboard fed by a watched spreadsheet folder.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write settings and initialize the database.
    Init {
        /// Where the database lives (default: ~/.local/share/spendwatch)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Folder to watch for payment spreadsheets
        #[arg(long = "watch-folder")]
        watch_folder: Option<String>,
    },
    /// Watch the folder and serve the dashboard.
    Serve {
        /// Address to bind (overrides settings)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides settings)
        #[arg(long)]
        port: Option<u16>,
        /// Folder to watch (overrides settings)
        #[arg(long = "watch-folder")]
        watch_folder: Option<String>,
        /// Directory with the dashboard front end
        #[arg(long = "static-dir")]
        static_dir: Option<String>,
        /// Require login for the API
        #[arg(long)]
        auth: bool,
    },
    /// Parse a spreadsheet once and print the merged view.
    Ingest {
        /// Path to the .xlsx/.xlsm workbook
        file: String,
    },
    /// Show settings and database summary.
    Status,
    /// Manage dashboard users.
    #[cfg(feature = "auth")]
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[cfg(feature = "auth")]
#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a login. The password is prompted for.
    Add {
        /// Login name
        username: String,
        /// Display name
        #[arg(long)]
        name: Option<String>,
    },
}
