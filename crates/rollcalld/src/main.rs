use anyhow::{Context, Result};
use chrono::Local;
use rollcall_core::{
    AttendanceLedger, CsvLedgerStore, Gallery, GalleryConfig, OnnxPerception, Pipeline, PipelineOptions,
};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use zbus::object_server::SignalEmitter;

mod config;
mod dbus_interface;
mod engine;
mod preview;
mod source;

use config::Config;
use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};
use engine::EngineEvent;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");
    let config = Config::from_env();

    let mut perception = OnnxPerception::load(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("failed to load face models")?;

    let entries = if config.gallery_path.exists() {
        GalleryConfig::load(&config.gallery_path)?.entries
    } else {
        tracing::warn!(
            path = %config.gallery_path.display(),
            "gallery file not found; every face will be Unknown"
        );
        Vec::new()
    };
    let gallery = Gallery::build(&entries, &mut perception).gallery;

    let store = CsvLedgerStore::new(&config.ledger_dir)?;
    let ledger = AttendanceLedger::open(store, Local::now().date_naive())?;

    let options = PipelineOptions {
        match_threshold: config.match_threshold,
        scale: config.scale,
        hold_overlay: config.hold_overlay,
    };
    let pipeline = Pipeline::new(
        source::V4lSource::new(config.camera_device.clone()),
        perception,
        gallery,
        ledger,
        preview::sink_for(config.preview_path.clone()),
        options,
    );

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let engine = engine::spawn_engine(pipeline, config.tick, events_tx);

    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let connection = builder
        .name(BUS_NAME)?
        .serve_at(
            OBJECT_PATH,
            AttendanceService::new(engine.clone(), config.camera_device.clone()),
        )?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    let emitter = SignalEmitter::new(&connection, OBJECT_PATH)?;
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let sent = match &event {
                EngineEvent::Recorded(record) => {
                    AttendanceService::attendance_recorded(&emitter, &record.name, &record.time_label()).await
                }
                EngineEvent::LedgerFailed(message) => AttendanceService::ledger_failed(&emitter, message).await,
            };
            if let Err(e) = sent {
                tracing::warn!(error = %e, ?event, "failed to emit signal");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    if let Err(e) = engine.stop().await {
        tracing::error!(error = %e, "failed to stop pipeline cleanly");
    }

    Ok(())
}
