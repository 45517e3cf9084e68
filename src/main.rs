//! evdev-bridge - remote-control buttons to notification events
//!
//! Usage: `evdev-bridge [CONFIG]`, where CONFIG is a `.json` or `.toml`
//! options file. Without it the add-on options file or the user config
//! file is used when present.

use anyhow::{Context, Result};
use evdev_bridge::config::Config;
use log::LevelFilter;
use std::path::PathBuf;

fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let raw = Config::load(config_path.as_deref()).context("Failed to load configuration")?;
    let (config, warnings) = Config::from_options(&raw);

    init_logging(config.log_level);
    Config::log_warnings(&warnings);

    log::info!("Starting evdev-bridge {}", env!("CARGO_PKG_VERSION"));
    for line in config.summary_lines() {
        log::info!("{}", line);
    }

    run(config)
}

/// `RUST_LOG`, when set, refines the configured level
fn init_logging(level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

#[cfg(target_os = "linux")]
fn run(config: Config) -> Result<()> {
    use evdev_bridge::delivery::{bounded, Poster, SupervisorSink};
    use evdev_bridge::input::{EvdevProvider, SessionManager};
    use evdev_bridge::Bridge;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let sink = SupervisorSink::from_env().context("Cannot post events")?;

    let (queue, receiver) = bounded(config.event_queue_size);
    let mut poster = Poster::start(
        receiver,
        sink,
        config.event_type.clone(),
        config.event_post_timeout,
    )
    .context("Failed to start event poster")?;
    let mut bridge = Bridge::new(&config, queue).context("Failed to start hold scheduler")?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("Failed to install signal handler")?;
    }

    let mut sessions = SessionManager::new(
        EvdevProvider,
        config.target_contains.clone(),
        config.grab_device,
    );
    sessions.run(&mut bridge, &running);

    log::info!("Shutting down");
    bridge.shutdown();
    // An in-flight post is abandoned rather than awaited
    poster.stop();

    let queued = bridge.queue().stats();
    let posted = poster.stats();
    log::info!(
        "Events accepted={} dropped={} posted={} failed={}",
        queued.accepted(),
        queued.dropped(),
        posted.posted(),
        posted.failed()
    );
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn run(_config: Config) -> Result<()> {
    anyhow::bail!("evdev-bridge reads Linux evdev devices and only runs on Linux")
}
