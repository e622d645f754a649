use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use super::downstream::Downstream;
use super::frame;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// Write a comment frame every `period` until the downstream closes.
/// Runs independently of upstream state, including during backoff.
pub fn spawn(downstream: Downstream, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = downstream.closed().cancelled() => break,
                _ = ticker.tick() => {
                    if !downstream.send(frame::heartbeat()).await {
                        break;
                    }
                }
            }
        }
    })
}
