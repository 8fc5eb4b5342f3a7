use anyhow::{Context, Result};
use attend_camera::{Capture, ReconnectPolicy, SnapshotCamera};
use attend_core::{EmbeddingCache, QualityGate, Roster, RosterLoader};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing_subscriber::EnvFilter;

mod backend;
mod config;
mod events;
mod model_client;
mod overlay;
mod roster_service;
mod shutdown;
mod stream;
mod supervisor;
mod worker;

use backend::BackendClient;
use config::{Config, Overrides};
use model_client::HttpModel;
use roster_service::RosterService;
use supervisor::RestartPolicy;
use worker::{CameraWorker, WorkerLinks};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const CAMERA_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "attendd", version, about = "Camera attendance presence daemon")]
struct Cli {
    /// TOML configuration file (default: $ATTEND_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Camera id, when a single camera is configured
    #[arg(long)]
    camera_id: Option<String>,
    /// Camera snapshot URL, when a single camera is configured
    #[arg(long)]
    camera_source: Option<String>,
    /// Backend base URL
    #[arg(long)]
    backend_url: Option<String>,
    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&Overrides {
        config_path: cli.config,
        camera_id: cli.camera_id,
        camera_source: cli.camera_source,
        backend_url: cli.backend_url,
        debug: cli.debug,
    })
    .context("failed to load configuration")?;

    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %config.backend_url,
        model = %config.model_url,
        cameras = config.cameras.len(),
        frame_skip = config.frame_skip,
        min_face_height = config.pipeline.min_face_height,
        min_blur_variance = config.pipeline.min_blur_variance,
        min_embeddings = config.pipeline.min_embeddings_per_track,
        preprocessing = config.enhance.enabled,
        "attendd starting"
    );

    let backend = BackendClient::new(&config.backend_url, HTTP_TIMEOUT)
        .context("failed to build backend client")?;
    let model =
        HttpModel::new(&config.model_url, HTTP_TIMEOUT).context("failed to build model client")?;

    let (trigger, shutdown) = shutdown::channel();

    // Roster: one shared loader, published to every camera.
    let loader = RosterLoader::new(
        backend.clone(),
        model.clone(),
        QualityGate::from_config(&config.pipeline),
        config.enhance.clone(),
    )
    .with_cache(EmbeddingCache::new(&config.cache_path));
    let (roster_tx, roster_rx) = watch::channel(Arc::new(Roster::empty()));
    let roster_task = tokio::spawn(
        RosterService::new(
            backend.clone(),
            loader,
            Duration::from_secs(config.roster_reload_secs),
            Duration::from_secs(config.roster_retry_secs),
        )
        .run(roster_tx, shutdown.clone()),
    );

    let (event_sender, dispatcher) =
        events::spawn_dispatcher(backend.clone(), events::EVENT_QUEUE_CAPACITY);

    let overlay = Arc::new(overlay::Overlay::with_font_file(
        &config.label_font,
        config.pipeline.min_embeddings_per_track,
    ));

    let mut tasks = Vec::new();
    for camera in &config.cameras {
        let slot = stream::FrameSlot::new();

        let addr: SocketAddr = format!("{}:{}", config.bind_host, camera.stream_port)
            .parse()
            .with_context(|| format!("invalid stream address for camera {}", camera.id))?;
        let app = stream::router(slot.clone(), &camera.id, shutdown.clone());
        let server_shutdown = shutdown.clone();
        let camera_id = camera.id.clone();
        let server_task = tokio::spawn(async move {
            if let Err(e) = stream::serve(addr, app, server_shutdown).await {
                tracing::error!(camera = %camera_id, %addr, error = %e, "stream server failed");
            }
        });
        tasks.push(("stream server", server_task));

        let links = WorkerLinks {
            roster: roster_rx.clone(),
            events: event_sender.clone(),
            slot,
            overlay: overlay.clone(),
        };
        let name = camera.id.clone();
        let camera = camera.clone();
        let model = model.clone();
        let pipeline = config.pipeline.clone();
        let frame_skip = config.frame_skip;
        let worker_shutdown = shutdown.clone();
        let start = move || {
            let camera = camera.clone();
            let model = model.clone();
            let pipeline = pipeline.clone();
            let links = links.clone();
            let shutdown = worker_shutdown.clone();
            async move {
                let source = SnapshotCamera::new(camera.source.clone(), CAMERA_TIMEOUT)?;
                let capture = Capture::new(source, ReconnectPolicy::default());
                CameraWorker::new(camera, capture, model, &pipeline, frame_skip, links)
                    .run(shutdown)
                    .await
            }
        };
        let supervisor_shutdown = shutdown.clone();
        let supervisor_task = tokio::spawn(async move {
            let policy = RestartPolicy::default();
            supervisor::supervise(&name, start, policy, supervisor_shutdown).await;
        });
        tasks.push(("supervisor", supervisor_task));
    }
    drop(event_sender);

    tracing::info!("attendd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("attendd shutting down");
    trigger.trigger();

    for (name, task) in tasks {
        log_join(name, task.await);
    }
    log_join("roster service", roster_task.await);
    // Workers are gone, so the queue closes once drained.
    log_join("event dispatcher", dispatcher.await);

    Ok(())
}

fn log_join(task: &str, result: Result<(), JoinError>) {
    match result {
        Ok(()) => tracing::debug!(task, "task finished"),
        Err(e) if e.is_panic() => tracing::error!(task, "task panicked"),
        Err(e) => tracing::warn!(task, error = %e, "task did not finish cleanly"),
    }
}
