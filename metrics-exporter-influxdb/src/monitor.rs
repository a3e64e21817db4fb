//! Connectivity checks against the backend.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::{Client as _, Connect},
    registry::Registry,
    reporter::{ticker, InfluxDbReporter},
};

impl<R, K> InfluxDbReporter<R, K>
where
    R: Registry,
    K: Connect,
{
    /// Checks whether the backend is ready, replacing the client if it isn't.
    ///
    /// A failed check always installs a brand new client, with no backoff: whether the new client can reach the
    /// backend is only known on the next check. Returns `true` if the backend was ready.
    pub async fn check_health(&self) -> bool {
        let client = self.client();

        match client.ready().await {
            Ok(true) => true,
            Ok(false) => {
                warn!("InfluxDB is not ready, recreating client.");
                self.reconnect();
                false
            }
            Err(e) => {
                warn!(error = %e, "Health check against InfluxDB failed, recreating client.");
                self.reconnect();
                false
            }
        }
    }

    /// Runs a health check on every tick of the health check interval until `cancel` fires.
    pub(crate) async fn run_health_checks(&self, cancel: &CancellationToken) {
        let mut ticker = ticker(self.config().health_check_interval());

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = self.check_health() => {}
            }
        }

        debug!("Health check loop stopped.");
    }
}
