//! Giveaway Runtime
//!
//! Standalone host for the giveaway engine:
//! - Opens the configured store and loads persisted giveaways
//! - Spawns the reconciliation scheduler
//! - Logs every lifecycle notification
//!
//! No chat platform is attached: message and membership lookups always
//! succeed, so this binary is useful for replaying a store or watching the
//! scheduler end overdue giveaways after downtime.
//!
//! Usage:
//!   cargo run --release --bin giveaway_runtime
//!
//! Environment variables:
//!   GIVEAWAY_STORE_BACKEND - json | sqlite (default: json)
//!   GIVEAWAY_STORE_PATH - store location (default: giveaways.json / giveaways.db)
//!   GIVEAWAY_TICK_INTERVAL_MS - reconciliation interval (default: 15000)
//!   GIVEAWAY_RETENTION_MS - purge ended giveaways after this long (default: keep)

use dotenv::dotenv;
use giveaways::giveaway::{GiveawayEvent, GiveawayManager, ManagerConfig, PermissiveHost};
use giveaways::storage::open_store;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    info!("🚀 Giveaway Runtime");

    let config = ManagerConfig::from_env()?;
    info!("   ├─ Store: {} ({})", config.store_backend.as_str(), config.store_path);
    info!("   ├─ Tick interval: {}ms", config.tick_interval_ms);
    match config.retention_ms {
        Some(ms) => info!("   ├─ Retention: {}ms", ms),
        None => info!("   ├─ Retention: disabled"),
    }
    info!("   └─ Drop max age: {}ms", config.drop_max_age_ms);

    let store = open_store(&config)?;
    let manager = GiveawayManager::builder(config, store, Arc::new(PermissiveHost)).build();
    let loaded = manager.load().await?;
    info!("✅ Manager ready with {} giveaways", loaded);

    let mut events = manager.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("⚠️  Event log lagged, {} notifications skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let scheduler = manager.spawn_scheduler();
    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    scheduler.abort();
    if let Err(e) = manager.shutdown().await {
        error!("❌ Final persist failed: {}", e);
    }

    info!("✅ Giveaway runtime stopped");
    Ok(())
}

fn log_event(event: &GiveawayEvent) {
    let giveaway = event.giveaway();
    match event {
        GiveawayEvent::Ended { winners, .. } | GiveawayEvent::Rerolled { winners, .. } => {
            let winners: Vec<String> = winners.iter().map(|w| w.to_string()).collect();
            info!(
                "🏆 {} {} ({}): [{}]",
                event.kind(),
                giveaway.id,
                giveaway.prize,
                winners.join(", ")
            );
        }
        GiveawayEvent::NoWinner { .. } | GiveawayEvent::Deleted { .. } => {
            info!("📣 {} {} ({})", event.kind(), giveaway.id, giveaway.prize);
        }
        GiveawayEvent::Refresh { .. } => {}
        _ => log::debug!("📣 {} {}", event.kind(), giveaway.id),
    }
}
