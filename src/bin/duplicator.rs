//! Audio Duplicator CLI
//!
//! Mirrors one render device's output to one or more other devices.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audio_duplicator::{
    audio::CpalBackend,
    config::EngineConfig,
    control::DeviceInfo,
    engine::DuplicationEngine,
    error::AudioError,
};

fn print_usage() {
    println!("Usage: duplicator [--config <path>] [--json] [<source> <destination>...]");
    println!();
    println!("  <source>        render device to capture (index or name substring)");
    println!("  <destination>   device(s) to duplicate to; omit to pick the first eligible");
    println!("  --config <path> engine settings as TOML");
    println!("  --json          print the device list as JSON and exit");
}

/// Resolve a selector against the device list: an index, or a
/// case-insensitive name substring
fn select_device<'a>(devices: &'a [DeviceInfo], selector: &str) -> Option<&'a DeviceInfo> {
    if let Ok(index) = selector.parse::<usize>() {
        return devices.get(index);
    }
    let needle = selector.to_lowercase();
    devices.iter().find(|d| d.name.to_lowercase().contains(&needle))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Audio Duplicator");

    let mut config = EngineConfig::default();
    let mut json_output = false;
    let mut selectors: Vec<String> = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                config = EngineConfig::from_toml_file(&path)?;
                tracing::info!("Loaded configuration from {}", path);
            }
            "--json" => json_output = true,
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => selectors.push(other.to_string()),
        }
    }

    let backend = Arc::new(CpalBackend::new());
    let mut engine = DuplicationEngine::new(backend, config);

    let devices = engine.list_source_candidates();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    println!("\n=== Render Devices ===");
    for (index, device) in devices.iter().enumerate() {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  [{}] {}{}", index, device.name, default_marker);
    }
    println!();

    if selectors.is_empty() {
        print_usage();
        return Ok(());
    }

    let source = select_device(&devices, &selectors[0])
        .ok_or_else(|| anyhow::anyhow!("No device matches '{}'", selectors[0]))?
        .clone();
    engine.set_source(&source.id)?;
    tracing::info!("Source: {}", source.name);

    if selectors.len() == 1 {
        engine.add_destination_auto()?;
    } else {
        for selector in &selectors[1..] {
            let destination = select_device(&devices, selector)
                .ok_or_else(|| anyhow::anyhow!("No device matches '{}'", selector))?
                .clone();
            engine.add_destination(&destination.id)?;
        }
    }

    for slot in engine.snapshot().slots {
        tracing::info!("Destination {}: {} (volume {})", slot.id, slot.device_name, slot.volume_display);
    }

    engine.start()?;
    tracing::info!("Duplication running - press Ctrl+C to stop");

    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                let mut lost_device = false;
                for fault in engine.check_faults() {
                    tracing::warn!("Stream fault: {}", fault);
                    if matches!(fault, AudioError::DeviceLost(_)) {
                        lost_device = true;
                    }
                }
                if lost_device {
                    tracing::error!("A device disappeared; stopping");
                    break;
                }

                ticks += 1;
                if ticks % 5 == 0 {
                    let stats = engine.stats();
                    tracing::info!(
                        "Stats: {} frames captured, {} delivered, {} dropped",
                        stats.frames_captured,
                        stats.frames_delivered,
                        stats.frames_dropped
                    );
                    for slot in &stats.per_slot {
                        tracing::debug!(
                            "  slot {}: {} queued, {} overflows, {} underruns",
                            slot.id,
                            slot.queued,
                            slot.overflows,
                            slot.underruns
                        );
                    }
                }
            }
        }
    }

    engine.stop();
    tracing::info!("Shutdown complete");
    Ok(())
}
