//! Command-line interface definition using clap

use clap::Parser;
use std::path::PathBuf;

/// TCP gateway bridging an EPOS till to a card payment terminal
#[derive(Parser, Debug)]
#[command(name = "epos-bridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,

    /// Override the EPOS listen port from config
    #[arg(long, value_name = "PORT")]
    pub listen_port: Option<u16>,

    /// Enable verbose debug output
    #[arg(short, long)]
    pub verbose: bool,
}
