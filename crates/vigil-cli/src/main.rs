use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use vigil_core::signal::{DEFAULT_CLIENT_TIMEOUT, DEFAULT_POLL_INTERVAL};
use vigil_core::snapshot::DEFAULT_SNAPSHOT_SIZE;
use vigil_core::{FaceDetector, FaceRecognizer, Gallery, RecognitionClient, RecognitionOutcome, SignalDir};

mod enroll;

#[zbus::proxy(
    interface = "org.vigil.Vigil1",
    default_service = "org.vigil.Vigil1",
    default_path = "/org/vigil/Vigil1"
)]
trait Vigil {
    async fn present(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil face presence and recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask the daemon who is in front of the camera
    Recognize {
        /// Signal directory shared with vigild
        #[arg(long, env = "VIGIL_COMM_PATH")]
        comm_path: PathBuf,
        /// Give up after this many milliseconds
        #[arg(long, default_value_t = DEFAULT_CLIENT_TIMEOUT.as_millis() as u64)]
        timeout_ms: u64,
        /// Poll interval for the result file
        #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
        poll_ms: u64,
    },
    /// Print whether a face is nearby
    Presence {
        /// Use the system bus instead of the session bus
        #[arg(long)]
        system: bool,
    },
    /// Show daemon status
    Status {
        #[arg(long)]
        system: bool,
    },
    /// Remove stale request/result files
    Clean {
        #[arg(long, env = "VIGIL_COMM_PATH")]
        comm_path: PathBuf,
    },
    /// Add labeled faces from still images to the gallery
    Enroll {
        /// Name returned when this face is recognized
        #[arg(short, long)]
        label: String,
        /// Gallery file (default: $XDG_DATA_HOME/vigil/gallery.json)
        #[arg(long, env = "VIGIL_GALLERY_PATH")]
        gallery: Option<PathBuf>,
        /// Directory containing the ONNX models
        #[arg(long, env = "VIGIL_MODEL_DIR")]
        model_dir: Option<PathBuf>,
        /// Detection downscale, matching the daemon
        #[arg(long, env = "VIGIL_RESIZE_FACTOR", default_value_t = 0.5)]
        resize_factor: f32,
        #[arg(long, env = "VIGIL_SNAPSHOT_SIZE", default_value_t = DEFAULT_SNAPSHOT_SIZE)]
        snapshot_size: u32,
        /// Images containing the face
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Recognize {
            comm_path,
            timeout_ms,
            poll_ms,
        } => {
            let client = RecognitionClient::new(SignalDir::new(comm_path))
                .with_timeout(Duration::from_millis(timeout_ms))
                .with_poll_interval(Duration::from_millis(poll_ms.max(1)));
            let outcome = tokio::task::spawn_blocking(move || client.recognize()).await??;
            match outcome {
                RecognitionOutcome::Label(label) => println!("{label}"),
                RecognitionOutcome::NoFaceAvailable => {
                    eprintln!("no face available");
                    return Ok(ExitCode::from(2));
                }
            }
        }
        Commands::Presence { system } => {
            let proxy = VigilProxy::new(&connect(system).await?).await?;
            let present = proxy.present().await.context("Present() failed; is vigild running?")?;
            println!("{}", if present { "present" } else { "absent" });
            if !present {
                return Ok(ExitCode::from(1));
            }
        }
        Commands::Status { system } => {
            let proxy = VigilProxy::new(&connect(system).await?).await?;
            let raw = proxy.status().await.context("Status() failed; is vigild running?")?;
            let status: serde_json::Value = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Clean { comm_path } => {
            let removed = SignalDir::new(&comm_path).clear_stale()?;
            println!("removed {removed} signal file(s) from {}", comm_path.display());
        }
        Commands::Enroll {
            label,
            gallery,
            model_dir,
            resize_factor,
            snapshot_size,
            images,
        } => {
            let gallery_path = gallery.unwrap_or_else(|| vigil_core::default_data_dir().join("gallery.json"));
            let model_dir = model_dir.unwrap_or_else(vigil_core::default_model_dir);

            let mut detector = FaceDetector::load(&model_dir.join(vigil_core::SCRFD_MODEL_FILE).to_string_lossy())?;
            let mut embedder =
                FaceRecognizer::load(&model_dir.join(vigil_core::ARCFACE_MODEL_FILE).to_string_lossy())?;
            let mut store = Gallery::load_or_empty(&gallery_path)?;

            for (i, path) in images.iter().enumerate() {
                let embedding = enroll::embed_image(
                    &mut detector,
                    &mut embedder,
                    path,
                    i as u64,
                    resize_factor,
                    snapshot_size,
                )?;
                let id = store.enroll(&label, embedding)?;
                println!("{}: enrolled {label} as {id}", path.display());
            }

            store.save(&gallery_path)?;
            println!("gallery {} now has {} entries", gallery_path.display(), store.len());
        }
        Commands::Devices => {
            let devices = vigil_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("no V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}\t{} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn connect(system: bool) -> zbus::Result<zbus::Connection> {
    if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
}
