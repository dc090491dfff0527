use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use vigil_core::{
    FaceDetector, FaceRecognizer, FrameSource, Gallery, GalleryClassifier, PresenceState, PresenceTracker, SignalDir,
};
use vigil_hw::Camera;

mod config;
mod dbus_interface;
mod engine;
mod gateway;
mod orchestrator;

use config::{Config, DbusBus};
use dbus_interface::VigilService;
use gateway::Gateway;
use orchestrator::FrameOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("vigild starting");

    let config = Config::from_env()?;
    tracing::info!(
        comm_path = %config.comm_path.display(),
        camera = %config.camera_device,
        model_dir = %config.model_dir.display(),
        face_area = config.face_area_threshold,
        miss_limit = config.miss_limit,
        "configuration loaded"
    );

    // Stale signals go before anything can answer a request.
    let gateway = Gateway::start(SignalDir::new(&config.comm_path), config.gateway())
        .context("failed to clear stale signal files")?;

    let (presence_tx, presence_rx) = watch::channel(PresenceState::Absent);
    let (snapshot_tx, snapshot_rx) = watch::channel(None);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let stop = Arc::new(AtomicBool::new(false));

    // Fail fast on camera and models.
    let camera = Camera::open(&config.camera_device, config.capture_width, config.capture_height)?;
    let detector = FaceDetector::load(&config.scrfd_model_path())?;
    let embedder = FaceRecognizer::load(&config.arcface_model_path())?;

    let gallery = Gallery::load_or_empty(&config.gallery_path)?;
    if gallery.is_empty() {
        tracing::warn!(
            path = %config.gallery_path.display(),
            "gallery is empty; every face will be labeled unknown"
        );
    } else {
        tracing::info!(entries = gallery.len(), "gallery loaded");
    }
    let recognizer = engine::spawn_recognizer(
        embedder,
        GalleryClassifier::new(gallery, config.similarity_threshold),
    )?;

    let mut orchestrator = FrameOrchestrator::new(
        detector,
        PresenceTracker::new(config.presence()),
        config.orchestrator(),
        presence_tx,
        snapshot_tx,
    );
    let warmup_frames = config.warmup_frames;
    let vision_stop = Arc::clone(&stop);
    let (vision_done_tx, vision_done_rx) = tokio::sync::oneshot::channel::<()>();
    let vision = std::thread::Builder::new()
        .name("vigil-vision".into())
        .spawn(move || -> Result<()> {
            // Dropped on every exit path, waking the main task.
            let _done = vision_done_tx;
            let mut stream = camera.stream()?;
            if warmup_frames > 0 {
                tracing::info!(count = warmup_frames, "discarding warmup frames");
                for _ in 0..warmup_frames {
                    let _ = stream.next_frame();
                }
            }
            orchestrator.run(&mut stream, &vision_stop)?;
            Ok(())
        })
        .context("failed to spawn vision thread")?;

    let _dbus = if config.dbus_enabled {
        let service = VigilService::new(
            presence_rx,
            snapshot_rx.clone(),
            gateway.subscribe(),
            recognizer.clone(),
            config.comm_path.display().to_string(),
        );
        match serve_dbus(config.dbus_bus, service).await {
            Ok(conn) => {
                tracing::info!(name = dbus_interface::BUS_NAME, bus = ?config.dbus_bus, "D-Bus endpoint registered");
                Some(conn)
            }
            Err(e) => {
                tracing::warn!(error = %e, "D-Bus endpoint unavailable; continuing without it");
                None
            }
        }
    } else {
        tracing::info!("D-Bus endpoint disabled via VIGIL_DBUS_ENABLED=0");
        None
    };

    let gateway_task = tokio::spawn(gateway.run(snapshot_rx, recognizer, shutdown_rx));

    tracing::info!("vigild ready");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            tracing::info!("vigild shutting down");
        }
        _ = vision_done_rx => {
            tracing::error!("vision loop ended; shutting down");
        }
    }

    stop.store(true, Ordering::Release);
    let _ = shutdown_tx.send(true);
    gateway_task.await.context("gateway task panicked")?;

    match tokio::task::spawn_blocking(move || vision.join()).await? {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "vision loop failed"),
        Err(_) => tracing::error!("vision thread panicked"),
    }

    Ok(())
}

async fn serve_dbus(bus: DbusBus, service: VigilService) -> zbus::Result<zbus::Connection> {
    let builder = match bus {
        DbusBus::Session => zbus::connection::Builder::session()?,
        DbusBus::System => zbus::connection::Builder::system()?,
    };
    builder
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await
}
