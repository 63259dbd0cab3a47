//! `rollcall` - CLI for classroom attendance
//!
//! This binary registers students, records check-ins, runs the simulated
//! camera surfaces, and reports today's attendance.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use rollcall::cli::{Cli, Command, ConfigCommand, ListTarget, ScanCommand};
use rollcall::detection::{DetectionSurface, RandomRecognizer, SimulatedDetector, SurfaceHandle};
use rollcall::presentation::{record_line, render_text, student_line, TracingPresenter};
use rollcall::service::{AttendanceService, ScanOutcome};
use rollcall::storage::{SqliteStore, Storage};
use rollcall::{init_logging, Config, SharedCollaborator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        command => {
            let store = if cli.local {
                None
            } else {
                let path = config.database_path();
                let storage = Storage::open(&path)
                    .with_context(|| format!("failed to open database {}", path.display()))?;
                Some(Arc::new(SqliteStore::new(storage)))
            };
            run(config, store, command).await
        }
    }
}

async fn run(
    mut config: Config,
    store: Option<Arc<SqliteStore>>,
    command: Command,
) -> anyhow::Result<()> {
    // The local database is ready as soon as it is open.
    config.sync.initial_delay_ms = 0;

    let collaborator = store.clone().map(|s| s as SharedCollaborator);
    let mut service = AttendanceService::new(config, collaborator, Arc::new(TracingPresenter));
    service.connect().await;

    match command {
        Command::Register(cmd) => match service.register_student(cmd.into()).await {
            Ok(registration) => {
                let s = &registration.student;
                println!("Registered {} ({}) in {}", s.name, s.student_id, s.course);
            }
            Err(e) => anyhow::bail!(e),
        },
        Command::CheckIn(cmd) => match service.check_in_manual(&cmd.name).await {
            Ok(check_in) => println!(
                "{} checked in at {}",
                check_in.record.name,
                check_in
                    .record
                    .check_in_time
                    .with_timezone(&service.config().utc_offset())
                    .format("%H:%M:%S")
            ),
            Err(rejection) => println!("{rejection}"),
        },
        Command::Scan(cmd) => handle_scan(&service, &cmd).await?,
        Command::Status(cmd) => {
            let view = service.dashboard(&service.now());
            if cmd.json {
                let status = serde_json::json!({
                    "mode": service.sync_mode().to_string(),
                    "database_path": store.as_ref().map(|_| service.config().database_path()),
                    "dashboard": view,
                });
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", render_text(&view, service.config().utc_offset()));
                if let Some(store) = &store {
                    let stats = store.stats()?;
                    println!();
                    println!("Database:   {}", service.config().database_path().display());
                    println!("Size:       {} bytes", stats.db_size_bytes);
                }
            }
        }
        Command::List(cmd) => match cmd.target {
            ListTarget::Students => {
                let students = service.students();
                if cmd.json {
                    println!("{}", serde_json::to_string_pretty(&students)?);
                } else if students.is_empty() {
                    println!("No students registered.");
                } else {
                    for s in &students {
                        println!("{}", student_line(s));
                    }
                }
            }
            ListTarget::Attendance => {
                let records = service.records();
                let offset = service.config().utc_offset();
                if cmd.json {
                    println!("{}", serde_json::to_string_pretty(&records)?);
                } else if records.is_empty() {
                    println!("No attendance recorded.");
                } else {
                    for r in &records {
                        println!("{}", record_line(r, offset));
                    }
                }
            }
        },
        Command::Config(_) => unreachable!("config commands are handled before startup"),
    }
    Ok(())
}

async fn handle_scan(service: &AttendanceService, cmd: &ScanCommand) -> anyhow::Result<()> {
    let surface = DetectionSurface::from(cmd.surface);
    let profile = service.config().detection.profile(surface);
    let mut detector = SimulatedDetector::for_profile(profile, cmd.seed);
    let mut recognizer = RandomRecognizer::new(cmd.seed);
    let handle = SurfaceHandle::new(surface);

    println!("Starting {surface} camera, press Ctrl-C to stop...");
    let stopper = handle.clone();
    let outcome = tokio::select! {
        outcome = service.scan(&handle, &mut detector, &mut recognizer) => outcome?,
        _ = tokio::signal::ctrl_c() => {
            stopper.stop();
            ScanOutcome::Stopped
        }
    };

    match outcome {
        ScanOutcome::Stopped => println!("Camera stopped."),
        ScanOutcome::Attempted { face, result } => {
            println!(
                "Face detected at ({}, {}) {}x{}",
                face.x, face.y, face.width, face.height
            );
            match result {
                Ok(check_in) => println!("Recognized {}, checked in.", check_in.record.name),
                Err(rejection) => println!("{rejection}"),
            }
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Max records:        {}", config.storage.max_records);
                println!();
                println!("[Sync]");
                println!("  Initial delay (ms): {}", config.sync.initial_delay_ms);
                println!("  Max attempts:       {}", config.sync.max_attempts);
                println!("  Backoff (ms):       {}", config.sync.backoff_ms);
                println!("  Init timeout (ms):  {}", config.sync.init_timeout_ms);
                println!("  Create timeout (ms):{}", config.sync.create_timeout_ms);
                println!();
                println!("[Attendance]");
                println!("  UTC offset (min):   {}", config.attendance.utc_offset_minutes);
                println!("  Recent limit:       {}", config.attendance.recent_limit);
                println!();
                println!("[Detection]");
                for (name, p) in [
                    ("recognition", &config.detection.recognition),
                    ("quick_attendance", &config.detection.quick_attendance),
                ] {
                    println!(
                        "  {name:<18}  poll {} ms, hit rate {:.2}, settle {} ms, analysis {} ms",
                        p.poll_interval_ms, p.hit_rate, p.confirm_delay_ms, p.analysis_delay_ms
                    );
                }
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
