/*!
Fixed-interval round scheduling.
*/

use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::{Result, SnapshotError};

/// Parse a duration string such as `60m`, `1h 30m` or `45s`
///
/// Zero is rejected; an invalid interval is a configuration error.
pub fn parse_interval(raw: &str) -> Result<Duration> {
    let interval = humantime::parse_duration(raw.trim())
        .map_err(|e| SnapshotError::config(format!("invalid interval '{raw}': {e}")))?;
    if interval.is_zero() {
        return Err(SnapshotError::config(format!(
            "interval '{raw}' must be a positive duration"
        )));
    }
    Ok(interval)
}

/// Fires `on_tick` immediately and then once per interval, forever
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(SnapshotError::config("interval must be a positive duration"));
        }
        Ok(Self { interval })
    }

    /// Run the timer loop
    ///
    /// Each tick spawns the future returned by `on_tick` and moves on
    /// without waiting for it, so a slow round may overlap the next one.
    pub async fn run<F, Fut>(&self, mut on_tick: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "Scheduler started");

        let mut tick = 0u64;
        loop {
            ticker.tick().await;
            tick += 1;
            debug!(tick, "Scheduler tick");
            tokio::spawn(on_tick());
        }
    }
}
