use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use libndnfs::config::DEFAULT_CONFIG_PATH;
use libndnfs::transport::DEFAULT_SOCKET_PATH;

/// Parse a key=value argument into a tuple, validating the format.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => {
            Ok((key.to_owned(), value.to_owned()))
        }
        _ => Err(format!("invalid option '{s}', expected key=value")),
    }
}

/// NexentaEdge NFS volume plugin.
#[derive(Parser, Debug)]
#[command(name = "ndnfs", version)]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the volume plugin in the foreground
    Start(StartArgs),

    /// Manage volumes directly, without the container engine
    #[command(subcommand)]
    Volume(VolumeCommand),

    /// Check that the cluster management API is reachable
    Health,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Plugin socket path
    #[arg(long, default_value = DEFAULT_SOCKET_PATH)]
    pub socket: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum VolumeCommand {
    /// Create and serve a volume
    Create {
        name: String,
        /// Volume option (size, acl, service, chunksize), repeatable
        #[arg(short = 'o', long = "opt", value_parser = parse_key_val)]
        opts: Vec<(String, String)>,
    },
    /// Unserve a volume and delete its bucket
    Delete { name: String },
    /// List volumes served by the cluster
    List,
    /// Show one volume
    Get { name: String },
}
