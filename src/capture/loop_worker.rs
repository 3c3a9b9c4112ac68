use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::devices::DeviceStatus;

use super::controller::WeakCaptureScheduler;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Drives video ticks for one epoch until cancelled.
///
/// The first tick fires immediately. A tick also fires as soon as the camera
/// becomes active, and the period restarts from there. Missed ticks are
/// skipped rather than replayed.
pub(super) async fn capture_loop(
    scheduler: WeakCaptureScheduler,
    epoch: u64,
    period: Duration,
    cancel_token: CancellationToken,
    mut video_status: watch::Receiver<DeviceStatus>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut stream_active = video_status.borrow_and_update().active;
    let mut watching = true;
    log_info!("capture loop started (epoch {epoch})");

    loop {
        let fire = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => true,
            changed = video_status.changed(), if watching => {
                if changed.is_err() {
                    watching = false;
                    false
                } else {
                    let active = video_status.borrow_and_update().active;
                    let became_active = active && !stream_active;
                    stream_active = active;
                    if became_active {
                        log_debug!("camera became active, capturing now");
                        ticker.reset();
                    }
                    became_active
                }
            }
        };
        if !fire {
            continue;
        }

        let Some(scheduler) = scheduler.upgrade() else {
            break;
        };
        if !scheduler.on_tick(epoch).await {
            break;
        }
    }

    log_info!("capture loop stopped (epoch {epoch})");
}
