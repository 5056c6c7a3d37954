use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;

use evidence_sync::config::EngineConfig;
use evidence_sync::engine::Engine;
use evidence_sync::lifecycle::RecordStatus;
use evidence_sync::model::GpsFix;
use evidence_sync::tags::{join_tags, ViolationTag};
use evidence_sync::upload::{Connectivity, UploadOutcome};

#[derive(Parser, Debug)]
#[command(author, version, about = "Offline-first evidence capture and sync engine")]
struct Args {
    /// Path to config file (TOML format)
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run startup recovery and print what was repaired
    Reconcile,
    /// List capture records and the backpressure gate
    Status,
    /// Register a finished video file as a new draft
    Ingest {
        /// Path to the video file
        video: PathBuf,
        #[arg(long, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, requires = "lat")]
        lng: Option<f64>,
    },
    /// Replace the violation tags on a draft record
    Tag {
        record_id: String,
        #[arg(value_enum)]
        tags: Vec<ViolationTag>,
    },
    /// Toggle violation tags on one detected vehicle
    TagVehicle {
        detection_id: String,
        #[arg(value_enum, required = true)]
        tags: Vec<ViolationTag>,
    },
    /// Upload one record
    Upload {
        record_id: String,
        /// Officer identifier (overrides config file)
        #[arg(long)]
        officer: Option<String>,
    },
    /// Upload every draft
    Submit {
        /// Officer identifier (overrides config file)
        #[arg(long)]
        officer: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = EngineConfig::load(&args.config)?;
    let engine = Engine::open(config, Connectivity::default()).await?;

    match args.command {
        Command::Reconcile => reconcile(&engine),
        Command::Status => status(&engine).await,
        Command::Ingest { video, lat, lng } => ingest(&engine, video, lat, lng).await,
        Command::Tag { record_id, tags } => {
            let tags: BTreeSet<ViolationTag> = tags.into_iter().collect();
            engine.store().set_manual_tags(&record_id, &tags).await?;
            println!("{}: [{}]", record_id, join_tags(&tags));
            Ok(())
        }
        Command::TagVehicle { detection_id, tags } => {
            let mut latest = None;
            for tag in tags {
                latest = Some(engine.store().toggle_detection_tag(&detection_id, tag).await?);
            }
            if let Some(detection) = latest {
                println!(
                    "{} ({}): [{}]",
                    detection.vehicle_identifier,
                    detection.vehicle_class,
                    join_tags(&detection.manual_tags)
                );
            }
            Ok(())
        }
        Command::Upload { record_id, officer } => {
            let officer = officer.unwrap_or_else(|| engine.config().officer_id.clone());
            match engine.uploader().upload(&record_id, &officer).await? {
                UploadOutcome::Uploaded { video_hash, .. } => {
                    println!("Uploaded {} ({})", record_id, video_hash)
                }
                UploadOutcome::AlreadyUploaded => println!("{} was already uploaded", record_id),
            }
            Ok(())
        }
        Command::Submit { officer } => {
            let officer = officer.unwrap_or_else(|| engine.config().officer_id.clone());
            let report = engine.uploader().submit_drafts(&officer).await?;
            for id in &report.uploaded {
                println!("uploaded  {}", id);
            }
            for (id, e) in &report.failed {
                println!("failed    {}: {}", id, e);
            }
            println!(
                "{} uploaded, {} failed",
                report.uploaded.len(),
                report.failed.len()
            );
            if report.failed.is_empty() {
                Ok(())
            } else {
                Err(format!("{} uploads failed", report.failed.len()).into())
            }
        }
    }
}

fn reconcile(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    let report = engine.startup_report();
    println!("Zombie records removed: {}", report.zombies_removed.len());
    println!("Interrupted uploads rolled back: {}", report.rolled_back);
    for (id, path) in &report.adopted {
        println!("Adopted orphan {} as {}", path.display(), id);
    }
    for path in &report.skipped_orphans {
        println!("Skipped unreadable orphan {}", path.display());
    }
    println!(
        "Pending: {}/{}{}",
        report.gate.pending,
        report.gate.ceiling,
        if report.gate.is_locked() { " (capture locked)" } else { "" }
    );
    Ok(())
}

async fn status(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    let records = engine.store().list().await?;
    if records.is_empty() {
        println!("No capture records");
    }
    for record in &records {
        let hash = record
            .video_hash
            .as_ref()
            .map(|h| h.short().to_string())
            .unwrap_or_else(|| "-".to_string());
        let recovered = if record.is_recovered() { " (recovered)" } else { "" };
        println!(
            "{} {:<8} {} {} [{}]{}",
            record.id,
            record.status,
            record.session_id,
            hash,
            join_tags(&record.manual_tags),
            recovered
        );
        for detection in engine.store().detections_for(&record.id).await? {
            println!(
                "    {} {} {} [{}]",
                detection.id,
                detection.vehicle_class,
                detection.vehicle_identifier,
                join_tags(&detection.manual_tags)
            );
        }
    }

    let gate = engine.gate().status().await?;
    let uploaded = records
        .iter()
        .filter(|r| r.status == RecordStatus::Uploaded)
        .count();
    println!(
        "Pending: {}/{}{}, uploaded: {}",
        gate.pending,
        gate.ceiling,
        if gate.is_locked() { " (capture locked)" } else { "" },
        uploaded
    );
    Ok(())
}

async fn ingest(
    engine: &Engine,
    video: PathBuf,
    lat: Option<f64>,
    lng: Option<f64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let gps = match (lat, lng) {
        (Some(lat), Some(lng)) => Some(GpsFix { lat, lng }),
        _ => None,
    };
    let video = video.canonicalize().map_err(|e| {
        format!("Failed to resolve video file '{}': {}", video.display(), e)
    })?;
    let record = engine.capture().ingest(&video, gps).await?;
    println!(
        "Created draft {} ({}) for {}",
        record.id, record.session_id, record.local_video_path
    );
    Ok(())
}
