mod announcer;
mod archive;
mod cache;
mod gate;
mod pipeline;
mod recognition;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;

use currency_assist_camera::mjpeg::MjpegSource;
use currency_assist_camera::still::StillCamera;
use currency_assist_camera::{latest_frame, run_capture_loop, FrameSource};
use currency_assist_common::config::Config;
use currency_assist_common::frame::Resolution;
use tracing::{error, info, warn};

use crate::announcer::Announcer;
use crate::archive::CaptureArchive;
use crate::cache::ResultCache;
use crate::gate::ChangeGate;
use crate::pipeline::Pipeline;
use crate::recognition::gemini::GeminiService;
use crate::recognition::RecognitionClient;

const FALLBACK_API_KEY_ENV: &str = "GOOGLE_API_KEY";

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
        mode = config.camera.mode,
        model = config.recognition.model,
        gate = config.gate.method,
        "starting currency-assist"
    );

    let Some(api_key) = read_api_key(&config.recognition.api_key_env) else {
        error!(
            env = config.recognition.api_key_env,
            fallback = FALLBACK_API_KEY_ENV,
            "no API key in environment"
        );
        std::process::exit(1);
    };

    let service = match GeminiService::new(&config.recognition, api_key) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create recognition service");
            std::process::exit(1);
        }
    };

    let resolution = Resolution::new(config.camera.width, config.camera.height);
    let mut source: Box<dyn FrameSource> = match config.camera.mode.as_str() {
        "mjpeg" => {
            let url = config.camera.url.as_deref().unwrap_or_default();
            match MjpegSource::new(url, resolution) {
                Ok(s) => Box::new(s),
                Err(e) => {
                    error!(url, error = %e, "failed to set up MJPEG source");
                    std::process::exit(1);
                }
            }
        }
        _ => match StillCamera::new(resolution, config.camera.capture_timeout_ms) {
            Ok(s) => Box::new(s),
            Err(e) => {
                error!(error = %e, "no camera available");
                std::process::exit(1);
            }
        },
    };
    // A stream paces itself; stills are taken once per interval.
    let pacing = (config.camera.mode != "mjpeg").then(|| config.camera.frame_interval());

    let mut pipeline = Pipeline::new(
        ChangeGate::from_config(&config.gate),
        RecognitionClient::from_config(Box::new(service), &config.recognition),
        ResultCache::new(config.cache.dedupe_window()),
        Announcer::from_config(&config.announcer),
        config.announcer.failure_notice_interval(),
        config.camera.stall_timeout(),
    );

    if let Some(dir) = &config.archive.dir {
        match CaptureArchive::open(dir, config.archive.max_files).await {
            Ok(archive) => pipeline = pipeline.with_archive(archive),
            Err(e) => warn!(error = %e, "capture archive disabled"),
        }
    }

    let (slot, mut frames) = latest_frame();
    let capture = tokio::spawn(async move {
        run_capture_loop(source.as_mut(), &slot, pacing).await;
    });

    pipeline.say(&config.announcer.greeting).await;

    tokio::select! {
        _ = pipeline.run(&mut frames) => {
            warn!("capture ended");
        }
        _ = shutdown_signal() => {
            info!("shutdown requested");
        }
    }

    capture.abort();
    pipeline.say(&config.announcer.farewell).await;
    info!("exiting");
}

fn read_api_key(var: &str) -> Option<String> {
    [var, FALLBACK_API_KEY_ENV]
        .into_iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
