//! Command-line interface for rollcall.
//!
//! This module provides the CLI structure for the `rollcall` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CheckInCommand, ConfigCommand, ListCommand, ListTarget, RegisterCommand, ScanCommand,
    StatusCommand, SurfaceArg,
};

use crate::logging::Verbosity;

/// rollcall - Classroom attendance with face check-in
///
/// Registers students, records one check-in per student per day, and shows
/// today's attendance. Records are kept in a local `SQLite` database.
#[derive(Debug, Parser)]
#[command(name = "rollcall")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Work without the database; nothing is kept after exit
    #[arg(long, global = true)]
    pub local: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register a new student
    Register(RegisterCommand),

    /// Check in a student by name
    CheckIn(CheckInCommand),

    /// Run a simulated camera until one check-in is attempted
    Scan(ScanCommand),

    /// Show today's attendance summary
    Status(StatusCommand),

    /// List students or attendance records
    List(ListCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}
