use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// FuriOS recovery - factory reset and storage unlock
#[derive(Parser)]
#[command(name = "furios-recovery")]
#[command(about = "Factory-reset pipeline for Droidian phones")]
#[command(version)]
pub struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a recovery configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe the data volume and print its encryption state
    Probe,
    /// Run the factory reset
    Reset {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Reboot after the reset finishes
        #[arg(long)]
        reboot: bool,
    },
    /// Validate a recovery configuration file
    Validate {
        /// Path to configuration file to validate
        config: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
