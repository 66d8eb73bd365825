//! Periodic keep-alive command.

use super::{config::or_default_interval, HEARTBEAT_COMMAND};
use crate::errors::{ErrorSender, RconError};
use async_trait::async_trait;
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Something a heartbeat can be sent over.
#[async_trait]
pub(crate) trait Beat: Send + Sync + 'static {
    async fn beat(&self, command: &str) -> Result<(), RconError>;
}

/// How a heartbeat task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatExit {
    /// The owning connection cancelled it.
    Cancelled,
    /// Sending the keep-alive failed; the error was reported.
    Failed,
}

/// Send [`HEARTBEAT_COMMAND`] over `target` every `interval` until `cancel`
/// fires or a send fails. The first beat goes out one interval after start.
/// A zero `interval` falls back to the default one.
pub(crate) fn spawn<B: Beat>(
    target: B,
    interval: Duration,
    cancel: CancellationToken,
    errors: Option<ErrorSender>,
    debug: bool,
) -> JoinHandle<HeartbeatExit> {
    let interval = or_default_interval(interval);

    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return HeartbeatExit::Cancelled,
                _ = ticker.tick() => {}
            }

            debug_log!(debug, "sending heartbeat command");

            // a send in flight when cancel fires is allowed to finish
            if let Err(err) = target.beat(HEARTBEAT_COMMAND).await {
                if cancel.is_cancelled() {
                    return HeartbeatExit::Cancelled;
                }

                tracing::warn!("heartbeat failed: {err}");
                if let Some(errors) = errors {
                    let _ = errors.send(err);
                }
                return HeartbeatExit::Failed;
            }
        }
    })
}
