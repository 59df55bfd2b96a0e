//! CLI module - Command-line interface definitions and handlers
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod commands;
pub mod output;

/// brainsearch - two-stage keyword and fragment search over document collections
#[derive(Parser, Debug)]
#[command(name = "brainsearch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable JSON output for machine consumption.
    #[arg(long, global = true)]
    pub robot: bool,

    /// Shorthand for --robot.
    #[arg(long, short = 'm', global = true)]
    pub machine: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (default: ~/.config/brainsearch/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the collections
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// User id owning the collections
    #[arg(long, global = true, env = "BRAINSEARCH_USER", default_value = "default")]
    pub user: String,

    /// Organization id owning the collections
    #[arg(long, global = true, env = "BRAINSEARCH_ORG", default_value = "default")]
    pub org: String,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    #[must_use]
    pub const fn robot_mode(&self) -> bool {
        self.robot || self.machine
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load pre-chunked documents into a collection
    Import(commands::import::ImportArgs),

    /// Search one or more collections
    Search(commands::search::SearchArgs),

    /// Show the effective configuration
    Config(commands::config::ConfigArgs),
}
