//! Faceguard - Main Entry Point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use api::{check_camera, init_logging, init_metrics, run_server, AppConfig, AppState};
use clap::{Parser, Subcommand};
use storage::RecordField;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "faceguard")]
#[command(about = "Liveness-gated face recognition for attendance and door access", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one authentication session and print its report
    Run {
        /// Class or activity code to record attendance against
        class_code: String,

        /// Replay frames from this directory
        #[arg(long)]
        frames_dir: Option<PathBuf>,
    },

    /// Serve the HTTP control API
    Serve {
        /// Listen address, overrides server.listen
        #[arg(long)]
        listen: Option<String>,
    },

    /// Attendance records
    #[command(subcommand)]
    Attendance(AttendanceCommands),

    /// List class codes with recorded attendance
    Classes,
}

#[derive(Subcommand)]
enum AttendanceCommands {
    /// Print every record in the display timezone
    List,
    /// Delete every record
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&config.logging)?;
    init_metrics(&config.metrics)?;

    info!("=== Faceguard v{} ===", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run { class_code, frames_dir } => {
            let mut camera = config.camera.clone();
            if frames_dir.is_some() {
                camera.frames_dir = frames_dir;
            }
            let state = AppState::build(config).await?;
            let source = camera_capture::open(&camera).context("opening camera")?;

            let mut handle = state.service.start_session(&class_code, source).await?;
            let report = tokio::select! {
                report = handle.wait() => report?,
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping session");
                    handle.stop();
                    handle.wait().await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&report)?);

            if let Some(door) = &state.door {
                if let Err(e) = door.save_status_log(&state.config.door.status_log_path) {
                    warn!(error = %e, "Door status log not written");
                }
                door.shutdown();
            }
        }
        Commands::Serve { listen } => {
            let addr = listen.unwrap_or_else(|| config.server.listen.clone());
            check_camera(&config.camera)?;
            let state = Arc::new(AppState::build(config).await?);
            run_server(state, &addr).await?;
        }
        Commands::Attendance(action) => {
            let store = storage::open_store(&config.storage).await?;
            match action {
                AttendanceCommands::List => {
                    let offset = config.storage.display_offset()?;
                    for record in store.list().await? {
                        for line in record.display_lines(&offset) {
                            println!("{line}");
                        }
                    }
                }
                AttendanceCommands::Clear => {
                    let deleted = store.delete_all().await?;
                    println!("deleted {deleted} records");
                }
            }
        }
        Commands::Classes => {
            let store = storage::open_store(&config.storage).await?;
            for class_code in store.list_distinct(RecordField::ClassCode).await? {
                println!("{class_code}");
            }
        }
    }

    Ok(())
}
