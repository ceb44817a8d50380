//! Command-line and environment configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

use crate::auth::FingerprintPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "agora", about = "Realtime presence and notification server", version)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "AGORA_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// SQLite database shared with the rest of the backend
    #[arg(long, env = "AGORA_DB_PATH", default_value = "./social-network.db")]
    pub db_path: PathBuf,

    /// Reject and delete sessions presented by a different User-Agent
    #[arg(
        long,
        env = "AGORA_FINGERPRINT_CHECK",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub fingerprint_check: bool,

    /// Write logs to `server.log` in this directory instead of stdout
    #[arg(long, env = "AGORA_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "AGORA_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Tracing filter directive; falls back to RUST_LOG
    #[arg(long, env = "AGORA_LOG_FILTER")]
    pub log_filter: Option<String>,
}

impl Config {
    pub fn fingerprint_policy(&self) -> FingerprintPolicy {
        if self.fingerprint_check {
            FingerprintPolicy::Enforce
        } else {
            FingerprintPolicy::Ignore
        }
    }
}
