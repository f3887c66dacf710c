//! sealkv probe
//!
//! Connects to the configured store, writes a probe value through the full
//! envelope/encryption pipeline, reads it back and removes it. Exits non-zero
//! when any step fails, so it doubles as a readiness check.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sealkv::{Store, StoreConfig};

const PROBE_TTL_SECS: u64 = 30;

/// Main entry point for the probe.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Open the pooled store
/// 4. Write, read back and delete a probe key
#[tokio::main]
async fn main() -> ExitCode {
    // Defaults to "sealkv=info", can be overridden with RUST_LOG
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sealkv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(elapsed) => {
            info!("Probe succeeded in {:?}", elapsed);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Probe failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<Duration> {
    let config = StoreConfig::from_env();
    info!(
        "Configuration loaded: url={}, pool_size={}, prefix={:?}, encryption={}",
        config.redis_url,
        config.pool_size,
        config.prefix,
        config.encryption_key.is_some()
    );

    let store = Store::from_config(&config).context("opening store")?;
    let started = std::time::Instant::now();

    let key = format!("probe:{}", uuid::Uuid::new_v4());
    let payload = chrono::Utc::now().to_rfc3339();

    store
        .put_with_expiry(&key, &payload, PROBE_TTL_SECS, None)
        .await
        .with_context(|| format!("writing {}", key))?;

    let read: Option<String> = store
        .get_with_timeout(&key, None, None)
        .await
        .with_context(|| format!("reading {}", key))?;
    match read {
        Some(value) if value == payload => {}
        Some(value) => bail!("read back {:?}, expected {:?}", value, payload),
        None => bail!("probe key {} vanished after write", key),
    }

    store
        .delete(&key, None)
        .await
        .with_context(|| format!("deleting {}", key))?;
    store.close().await;

    Ok(started.elapsed())
}
