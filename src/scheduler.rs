//! The cooperative event loop driving the engine: a repeating tick timer
//! plus the systemd-logind sleep-lifecycle signal stream, restructured from
//! the original daemon's GLib main loop into `tokio::select!` the way the
//! teacher's `run()` selects across its own long-lived tasks.

use std::time::Duration as StdDuration;

use futures_util::StreamExt;
use tracing::{info, warn};
use zbus::Connection;

use crate::checks::systemd::LogindManagerProxy;
use crate::engine::Engine;

/// Bounds how many ticks the scheduler will run, for test-driven finite runs.
pub struct RunOptions {
    pub interval: StdDuration,
    pub max_iterations: Option<u64>,
}

/// Drives `engine` until `max_iterations` ticks have elapsed, `SIGINT` is
/// received, or the sleep-lifecycle subscription is unavailable up front.
pub async fn run(mut engine: Engine, options: RunOptions) -> zbus::Result<()> {
    let connection = Connection::system().await?;
    let manager = LogindManagerProxy::new(&connection).await?;
    let mut sleep_signal = manager.receive_prepare_for_sleep().await?;

    let mut remaining = options.max_iterations;
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if remaining == Some(0) {
            info!("max iterations reached, exiting");
            return Ok(());
        }

        tokio::select! {
            _ = ticker.tick() => {
                let outcome = engine.tick_now();
                info!(?outcome, "tick complete");
                if let Some(n) = remaining.as_mut() {
                    *n -= 1;
                }
            }
            signal = sleep_signal.next() => {
                let Some(signal) = signal else {
                    warn!("sleep-lifecycle signal stream ended, exiting");
                    return Ok(());
                };
                match signal.args() {
                    Ok(args) if args.start => {
                        engine.before_sleep(chrono::Utc::now());
                    }
                    Ok(_) => {
                        engine.on_resume();
                    }
                    Err(e) => warn!(error = %e, "malformed PrepareForSleep signal"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received interrupt, shutting down");
                return Ok(());
            }
        }
    }
}
