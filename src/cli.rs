//! Command-line interface for the `wardenctl` demonstration binary.
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// A thin command-line front end for the warden supervisor engine.
///
/// This binary exists to demonstrate the library, not to be a production
/// process-management product: it runs a single manifest in the foreground
/// and exits when every process has stopped or `Ctrl-C` is pressed. Driving
/// a supervisor programmatically from another process (start/stop/restart
/// over some transport) is left to embedders, who hold a
/// [`warden::control::ControlHandle`] directly.
#[derive(Parser)]
#[command(name = "wardenctl", version, author)]
#[command(about = "Run a declarative process manifest", long_about = None)]
pub struct Cli {
    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Validate a manifest without starting anything.
    Validate {
        /// Path to the manifest file (YAML or JSON, detected by extension).
        manifest: PathBuf,
    },

    /// Start every process in the manifest and run until they all exit or
    /// `Ctrl-C` is pressed.
    Start {
        /// Path to the manifest file (YAML or JSON, detected by extension).
        manifest: PathBuf,
    },
}

/// Parses command-line arguments into a [`Cli`].
pub fn parse_args() -> Cli {
    Cli::parse()
}
