//! The report cycle: collect every metric in the registry, convert it into points, and write the batch.

use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    client::{Client as _, ClientError, Connect},
    point::{Point, Tags},
    registry::Registry,
    reporter::{ticker, InfluxDbReporter},
    transform::{transform_into, PointFactory},
};

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Returns the timestamp shared by every point of a report cycle starting at `now`.
///
/// When `align` is set, `now` is truncated down to the nearest multiple of `interval` since the Unix epoch, so that
/// an interval of 30 seconds always yields timestamps on the minute or half-minute. Times before the epoch are never
/// aligned.
pub fn cycle_timestamp(now: SystemTime, interval: Duration, align: bool) -> SystemTime {
    if !align || interval.is_zero() {
        return now;
    }

    let Ok(since_epoch) = now.duration_since(SystemTime::UNIX_EPOCH) else {
        return now;
    };

    let since_epoch = since_epoch.as_nanos();
    let aligned = since_epoch - since_epoch % interval.as_nanos();
    let secs = u64::try_from(aligned / NANOS_PER_SEC).unwrap_or(u64::MAX);
    let nanos = (aligned % NANOS_PER_SEC) as u32;
    SystemTime::UNIX_EPOCH + Duration::new(secs, nanos)
}

/// Converts every metric in `registry` into points stamped with `timestamp`.
pub fn collect<R>(registry: &R, measurement: &str, base_tags: &Tags, timestamp: SystemTime) -> Vec<Point>
where
    R: Registry + ?Sized,
{
    let factory = PointFactory::new(measurement, base_tags, timestamp);
    let mut points = Vec::new();
    registry.each(&mut |name, metric| transform_into(&factory, name, metric, &mut points));
    points
}

impl<R, K> InfluxDbReporter<R, K>
where
    R: Registry,
    K: Connect,
{
    /// Runs a single report cycle, returning the number of points written.
    ///
    /// The client is read once at the start of the cycle, so a reconnection happening concurrently only takes effect
    /// from the next cycle on.
    ///
    /// # Errors
    ///
    /// If the batch could not be written, an error is returned. Nothing is retried.
    pub async fn report(&self) -> Result<usize, ClientError> {
        let config = self.config();
        let client = self.client();

        let timestamp = cycle_timestamp(SystemTime::now(), config.interval(), config.align());
        let points = collect(self.registry(), config.measurement(), config.tags(), timestamp);
        let points_len = points.len();

        let mut batch = client.write_api(config.organization(), config.bucket());
        batch.write_points(points);
        batch.flush().await?;

        debug!(points = points_len, ?timestamp, "Reported metrics to InfluxDB.");
        Ok(points_len)
    }

    /// Runs report cycles on every tick of the report interval until `cancel` fires.
    pub(crate) async fn run_reports(&self, cancel: &CancellationToken) {
        let mut ticker = ticker(self.config().interval());

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.report() => {
                    if let Err(e) = result {
                        error!(error = %e, "Unable to send metrics to InfluxDB.");
                    }
                }
            }
        }

        debug!("Report loop stopped.");
    }
}
