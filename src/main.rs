// src/main.rs

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use log::{debug, error, info};

use camlift_node::config::Config;
use camlift_node::{CopyFrom, SharedRing, SimPort, SinkTarget, VideoEncoder};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // ------------------------------------------------------------
    // Config
    // ------------------------------------------------------------
    let cfg_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".into());

    let cfg = if std::path::Path::new(&cfg_path).exists() {
        let cfg = Config::load(&cfg_path)?;
        info!("[camlift] loaded {}", cfg_path);
        cfg
    } else {
        info!("[camlift] no {} found, using defaults", cfg_path);
        Config::default()
    };
    info!("[camlift] node '{}'", cfg.node_name);

    // ------------------------------------------------------------
    // Graceful shutdown
    // ------------------------------------------------------------
    let running = Arc::new(AtomicBool::new(true));
    {
        let r = running.clone();
        ctrlc::set_handler(move || {
            info!("\n[camlift] shutdown requested");
            r.store(false, Ordering::SeqCst);
        })?;
    }

    // ------------------------------------------------------------
    // Pre-trigger recording: simulated port → ring window
    // ------------------------------------------------------------
    let ring = SharedRing::bounded(cfg.ring_limit());
    let mut encoder = VideoEncoder::new(
        Box::new(SimPort::new()),
        cfg.port_format(),
        cfg.pool_config(),
    );
    encoder
        .start(SinkTarget::Ring(ring.clone()))
        .context("start recording")?;
    info!(
        "[camlift] recording into a {} KB pre-trigger window",
        cfg.ring_limit() / 1024
    );

    if cfg.capture.enabled {
        std::fs::create_dir_all(&cfg.capture.dir)
            .with_context(|| format!("create capture dir '{}'", cfg.capture.dir))?;
    }

    // ------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------
    info!("[camlift] running – Ctrl+C to stop");

    let mut last_stats = Instant::now();
    let mut last_trigger = Instant::now();

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(100));

        if let Some(err) = encoder.take_error() {
            error!("[camlift] recording failed: {}", err);
            break;
        }

        if last_stats.elapsed() >= Duration::from_secs(5) {
            let stats = ring.stats();
            let frame = encoder.current_frame();
            debug!(
                "[camlift] frame={:?} retained={}B marks={}",
                frame.map(|f| f.index),
                stats.retained,
                stats.frames
            );
            last_stats = Instant::now();
        }

        // The periodic trigger stands in for a motion/event signal: save
        // the retained lookback window, then start a fresh cycle.
        if cfg.capture.enabled
            && last_trigger.elapsed() >= Duration::from_secs(cfg.capture.trigger_interval_secs)
        {
            if let Err(e) = save_clip(&ring, &cfg.capture.dir) {
                error!("[camlift] clip save failed: {}", e);
            }
            last_trigger = Instant::now();
        }
    }

    // ------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------
    info!("[camlift] shutting down…");
    encoder.stop();
    info!(
        "[camlift] final status: {}",
        serde_json::to_string_pretty(&encoder.status())?
    );
    Ok(())
}

/// Copies the retained window out to a timestamped file, starting at the
/// first keyframe so the clip is decodable, then clears the window.
fn save_clip(ring: &SharedRing, dir: &str) -> anyhow::Result<()> {
    let name = format!("clip-{}.h264", chrono::Local::now().format("%Y%m%d-%H%M%S"));
    let path = PathBuf::from(dir).join(name);
    let file = std::fs::File::create(&path)
        .with_context(|| format!("create clip '{}'", path.display()))?;
    let mut out = std::io::BufWriter::new(file);

    let copied = ring.copy_to(&mut out, CopyFrom::FirstKeyframe)?;
    out.flush()?;
    if copied == 0 {
        // No keyframe retained yet; nothing decodable to save.
        drop(out);
        let _ = std::fs::remove_file(&path);
        info!("[camlift] no keyframe in window yet, clip skipped");
        return Ok(());
    }
    ring.clear();
    info!("[camlift] saved {} ({} KB)", path.display(), copied / 1024);
    Ok(())
}
