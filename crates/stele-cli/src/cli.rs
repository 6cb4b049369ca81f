use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stele",
    about = "Stele, an xAPI learning record store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the LRS server
    Serve(ServeArgs),
    /// Validate a configuration file without starting anything
    Check(CheckArgs),
    /// Probe a running server's health endpoint
    Health(HealthArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Configuration file; built-in defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Override the configured bind address
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Configuration file; built-in defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct HealthArgs {
    /// Configuration file naming the server address
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Probe this address instead of the configured one
    #[arg(long)]
    pub addr: Option<SocketAddr>,
}
