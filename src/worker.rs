use std::sync::Arc;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::database as db;
use crate::queue::UsageQueue;

/// Drains usage records into the database until cancelled
///
/// On shutdown whatever is still queued is written before returning.
pub async fn usage_recorder(
    db_pool: Arc<SqlitePool>,
    queue: Arc<UsageQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Usage recorder initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Usage recorder received shutdown signal, stopping");
                break;
            }

            record = queue.pop() => {
                if let Err(e) = db::save_usage(&record, db_pool.clone()).await {
                    log::error!("Failed to save usage record of {}: {e}", record.caller);
                }
            }
        };
    }

    let remaining = queue.drain();
    if !remaining.is_empty() {
        log::info!("Flushing {} queued usage records", remaining.len());
    }
    for record in remaining {
        if let Err(e) = db::save_usage(&record, db_pool.clone()).await {
            log::error!("Failed to save usage record of {}: {e}", record.caller);
        }
    }

    log::info!("Usage recorder has shut down gracefully");
    Ok(())
}
