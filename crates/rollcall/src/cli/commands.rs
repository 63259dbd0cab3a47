//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::detection::DetectionSurface;
use crate::service::NewStudent;

/// Register command arguments.
#[derive(Debug, Args)]
pub struct RegisterCommand {
    /// Unique student identifier
    #[arg(long = "id", value_name = "ID")]
    pub student_id: String,

    /// Full name
    #[arg(long)]
    pub name: String,

    /// Contact email
    #[arg(long)]
    pub email: String,

    /// Contact phone
    #[arg(long)]
    pub phone: String,

    /// Enrolled course
    #[arg(long)]
    pub course: String,

    /// Captured face image, e.g. a data URL
    #[arg(long, value_name = "DATA")]
    pub face_data: Option<String>,
}

impl From<RegisterCommand> for NewStudent {
    fn from(cmd: RegisterCommand) -> Self {
        Self {
            student_id: cmd.student_id,
            name: cmd.name,
            email: cmd.email,
            phone: cmd.phone,
            course: cmd.course,
            face_data: cmd.face_data,
        }
    }
}

/// Manual check-in arguments.
#[derive(Debug, Args)]
pub struct CheckInCommand {
    /// Student name as registered (case-insensitive)
    pub name: String,
}

/// Camera scan arguments.
#[derive(Debug, Args)]
pub struct ScanCommand {
    /// Which camera surface to run
    #[arg(short, long, value_enum, default_value = "recognition")]
    pub surface: SurfaceArg,

    /// Seed the simulated detector and recognizer
    #[arg(long)]
    pub seed: Option<u64>,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// What to list
    #[arg(value_enum)]
    pub target: ListTarget,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Camera surface argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SurfaceArg {
    /// Dashboard recognition camera
    Recognition,
    /// Quick-attendance camera
    Quick,
}

impl From<SurfaceArg> for DetectionSurface {
    fn from(arg: SurfaceArg) -> Self {
        match arg {
            SurfaceArg::Recognition => Self::Recognition,
            SurfaceArg::Quick => Self::QuickAttendance,
        }
    }
}

/// Collections that can be listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListTarget {
    /// Registered students
    Students,
    /// Attendance records
    Attendance,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_arg_conversion() {
        assert_eq!(
            DetectionSurface::from(SurfaceArg::Recognition),
            DetectionSurface::Recognition
        );
        assert_eq!(
            DetectionSurface::from(SurfaceArg::Quick),
            DetectionSurface::QuickAttendance
        );
    }

    #[test]
    fn test_register_command_into_form() {
        let cmd = RegisterCommand {
            student_id: "S1".into(),
            name: "Ann Lee".into(),
            email: "ann@example.edu".into(),
            phone: "555-0100".into(),
            course: "CS".into(),
            face_data: None,
        };
        let form = NewStudent::from(cmd);
        assert_eq!(form.student_id, "S1");
        assert_eq!(form.course, "CS");
        assert!(form.face_data.is_none());
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }

    #[test]
    fn test_list_target_value_names() {
        let names: Vec<_> = ListTarget::value_variants()
            .iter()
            .filter_map(|v| v.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        assert_eq!(names, vec!["students", "attendance"]);
    }
}
