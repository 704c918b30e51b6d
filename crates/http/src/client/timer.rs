//! Periodic background refresh of the access token

use super::{ClientInner, FlowTestClient};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Handle to a running refresh loop; dropping it stops the loop
#[derive(Debug)]
pub struct RefreshTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RefreshTimer {
    /// Spawn the loop on the current tokio runtime
    ///
    /// The loop holds a weak reference so it never keeps the client alive.
    pub(crate) fn spawn(inner: Weak<ClientInner>, period: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        let client = FlowTestClient { inner };

                        if client.session().refresh_token().is_none() {
                            debug!("No refresh token stored, skipping background refresh");
                            continue;
                        }
                        if let Err(err) = client.refresh_access_token().await {
                            warn!(error = %err, "Background token refresh failed");
                        }
                    }
                }
            }

            debug!("Background token refresh stopped");
        });

        debug!(period_secs = period.as_secs(), "Background token refresh started");
        Self { cancel, handle }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
