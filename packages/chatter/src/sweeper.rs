//! Periodic reclamation of idle topics.
//!
//! Topics normally disappear when their last subscriber leaves. A room CREATE
//! makes a topic before anyone subscribes; if that connection was already bound
//! elsewhere, nothing ever releases it. The sweeper catches those.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::ws::{RoomMode, TenantMode};

pub fn spawn_topic_sweeper(
    tenant: Arc<TenantMode>,
    room: Arc<RoomMode>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let removed = tenant.registry().sweep_idle() + room.registry().sweep_idle();
                    if removed > 0 {
                        info!("Swept {} idle topics", removed);
                    }
                }
            }
        }

        debug!("Topic sweeper stopped");
    })
}
