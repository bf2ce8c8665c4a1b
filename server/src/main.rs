mod routes;

use std::path::PathBuf;
use std::sync::Arc;

use frame_relay_capture::{CaptureDriver, FrameSink, RoboflowPipeline};
use frame_relay_common::config::Config;
use frame_relay_common::frame::FrameStore;
use routes::AppState;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        workspace = config.roboflow.workspace,
        workflow_id = config.roboflow.workflow_id,
        video_reference = %config.roboflow.video_reference,
        max_fps = config.roboflow.max_fps,
        "starting frame-relay"
    );

    let frames = Arc::new(FrameStore::new());

    // Capture problems never take the HTTP side down; the store just stays empty.
    let sink = Arc::new(FrameSink::new(
        Arc::clone(&frames),
        config.roboflow.output_field.clone(),
    ));
    let engine = RoboflowPipeline::new(config.roboflow.clone());
    let capture = match CaptureDriver::spawn(engine, sink) {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!(error = %e, "capture unavailable; serving without frames");
            None
        }
    };

    let state = Arc::new(AppState { frames });
    let app = routes::router(state, &config.server.static_dir);

    let addr = config.server.bind_addr();
    info!(addr, static_dir = %config.server.static_dir.display(), "HTTP server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "HTTP server error");
    }

    if let Some(handle) = capture {
        info!(
            published = handle.sink().published(),
            encode_failures = handle.sink().encode_failures(),
            "stopping capture"
        );
        // Joining blocks until the engine notices the stop flag.
        if let Err(e) = tokio::task::spawn_blocking(move || handle.stop()).await {
            warn!(error = %e, "capture shutdown task failed");
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
