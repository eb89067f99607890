use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Export error: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),

    #[error("Worksheet '{name}' not found. Available: {available}")]
    MissingSheet { name: String, available: String },

    #[error("Watch folder not found: {0}")]
    WatchFolderMissing(String),

    #[error("Invalid file pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Unknown company: {0}")]
    UnknownCompany(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Invalid credentials")]
    Unauthorized,

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Shared state poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, DashError>;
