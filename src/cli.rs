//! Command-line interface definitions using clap

use clap::{Parser, Subcommand};

/// Geotrail - a geolocating reverse proxy
#[derive(Parser, Debug)]
#[command(name = "geotrail")]
#[command(version)]
#[command(
    about = "Transparent reverse proxy that records geolocated access logs",
    long_about = None
)]
pub struct Cli {
    /// Configuration file (default: config.toml)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Run the proxy server (default)
    Serve,

    /// Resolve addresses against the configured dataset
    Lookup {
        /// IPv4 or IPv6 addresses
        #[arg(required = true)]
        addresses: Vec<String>,

        /// Print one JSON object per address
        #[arg(long)]
        json: bool,
    },

    /// Print a sample configuration, or write it to PATH
    GenerateConfig {
        path: Option<String>,
    },
}
