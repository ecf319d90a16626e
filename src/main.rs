//! Readback pipeline demo over a software device

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use color_eyre::{eyre::WrapErr, Result};
use flume::bounded;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use readback::{
    ChannelSink, Config, Delivery, GrayscaleTransform, Pipeline, SoftwareDevice, SubmitOutcome,
};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("readback=debug"));
    let fmt = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::uptime());
    let registry = tracing_subscriber::registry().with(filter).with(fmt);

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("Readback demo launching...");

    // Load configuration: optional TOML path as the first argument
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref()).wrap_err("failed to load configuration")?;
    readback::CONFIG.store(Arc::new(config.clone()));

    let (tx, rx) = bounded::<Delivery>(4);

    // Drain results off the worker thread
    let consumer = thread::Builder::new()
        .name("readback-consumer".into())
        .spawn(move || {
            let mut received = 0u64;
            for delivery in rx.iter() {
                received += 1;
                let latency = readback::utils::now_millis().saturating_sub(delivery.timestamp_ms);
                tracing::debug!(
                    kind = ?delivery.frame.kind,
                    bytes = delivery.frame.data.len(),
                    latency_ms = latency,
                    "Result received"
                );
            }
            received
        })
        .wrap_err("failed to spawn consumer thread")?;

    let pipeline = Pipeline::new(
        config.pipeline.clone(),
        SoftwareDevice::new(),
        GrayscaleTransform::new(),
        ChannelSink::new(tx),
    );

    let capture = &config.capture;
    pipeline
        .start(capture.width, capture.height)
        .wrap_err("failed to start pipeline")?;

    // Act as the render loop
    let frame_interval = Duration::from_secs_f64(1.0 / f64::from(capture.fps.max(1)));
    let deadline = Instant::now() + Duration::from_secs(capture.duration_secs);
    let mut dropped = 0u64;
    let mut last_report = Instant::now();
    while Instant::now() < deadline {
        if pipeline.submit_capture_cycle() == SubmitOutcome::Dropped {
            dropped += 1;
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            info!(fps = pipeline.update_fps(), "Processing rate");
            last_report = Instant::now();
        }
        thread::sleep(frame_interval);
    }

    pipeline.stop();
    let stats = pipeline.stats();
    drop(pipeline); // closes the result channel

    let received = consumer.join().unwrap_or_else(|_| {
        warn!("Consumer thread panicked");
        0
    });

    info!(?stats, dropped, received, "Readback demo shutting down");
    Ok(())
}
