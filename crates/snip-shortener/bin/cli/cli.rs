use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub const DATABASE_DSN_ENV: &str = "SNIP_DATABASE_DSN";
pub const FILE_STORAGE_PATH_ENV: &str = "SNIP_FILE_STORAGE_PATH";
pub const SECRET_KEY_ENV: &str = "SNIP_SECRET_KEY";
pub const LOG_FORMAT_ENV: &str = "SNIP_LOG_FORMAT";
pub const TOKEN_ENV: &str = "SNIP_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "snip", about = "Operate a snip URL shortener store")]
pub struct CLI {
    /// PostgreSQL connection string. Takes precedence over the journal file.
    #[arg(long, env = DATABASE_DSN_ENV, global = true)]
    pub database_dsn: Option<String>,

    /// Journal file backing the in-memory store.
    #[arg(long, env = FILE_STORAGE_PATH_ENV, global = true)]
    pub file_storage_path: Option<PathBuf>,

    /// Hex-encoded token signing secret.
    #[arg(long, env = SECRET_KEY_ENV, hide_env_values = true, global = true)]
    pub secret_key: Option<String>,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten a URL.
    Shorten {
        url: String,
        /// Owner token. A new one is issued when missing or invalid.
        #[arg(long, env = TOKEN_ENV)]
        token: Option<String>,
    },
    /// Print the URL behind a short key.
    Resolve { key: String },
    /// List the live URLs owned by a token.
    List {
        #[arg(long, env = TOKEN_ENV)]
        token: String,
    },
    /// Soft-delete short keys owned by a token.
    Delete {
        #[arg(required = true)]
        keys: Vec<String>,
        #[arg(long, env = TOKEN_ENV)]
        token: String,
    },
    /// Print record and owner counts.
    Stats,
    /// Check a token, issuing a new one if it is missing or invalid.
    Token {
        #[arg(long, env = TOKEN_ENV)]
        token: Option<String>,
    },
}
