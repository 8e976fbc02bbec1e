use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::uploads::UploadStore;

/// Background task that prunes published upload batches past their
/// retention. Peers download promptly; anything older than the window is
/// abandoned.
pub async fn run_cleanup_loop(store: Arc<UploadStore>, retention: Duration, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        match store.sweep(retention).await {
            Ok(count) => {
                if count > 0 {
                    info!("cleanup: pruned {count} expired upload batch(es)");
                }
            }
            Err(e) => {
                warn!("cleanup error: {e}");
            }
        }
    }
}
