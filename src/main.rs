//! Vigil: live camera object detection with RTSP and metadata fan-out

use std::env;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use color_eyre::Result;
use tracing::{error, info, warn};

use vigil::detect::OnnxDetector;
use vigil::pipeline::FramePipeline;
use vigil::{utils, Config};

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vigil=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Vigil launching...");

    // Load configuration; a missing file is created with defaults
    let config_path = env::args().nth(1).unwrap_or_else(|| "config.json".into());
    let config = match Config::load(&config_path) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Configuration error ({}): {}", config_path, e);
            process::exit(-1);
        }
    };
    vigil::CONFIG.store(config.clone());

    // Probe is advisory: the capture pipeline reports the authoritative
    // failure if the device is unusable
    if let Err(e) = utils::probe_device(config.camera_id) {
        warn!("Device probe failed: {}", e);
    }

    let detector = match OnnxDetector::load(&config.model_path, config.use_gpu) {
        Ok(detector) => detector,
        Err(e) => {
            error!("Detector initialization failed: {}", e);
            process::exit(-1);
        }
    };

    let mut pipeline = match FramePipeline::init(config, Box::new(detector)) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Pipeline initialization failed: {}", e);
            process::exit(-1);
        }
    };

    let stop = pipeline.stop_handle();
    ctrlc::set_handler(move || {
        info!("Interrupt received, stopping");
        stop.store(true, Ordering::SeqCst);
    })?;

    pipeline.run()?;

    info!("Vigil shutting down");
    Ok(())
}
