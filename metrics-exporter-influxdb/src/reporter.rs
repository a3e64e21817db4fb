use std::{fmt, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::{client::Connect, point::Tags, registry::Registry};

/// Reporter configuration.
///
/// Built and validated by [`InfluxDbBuilder`][crate::InfluxDbBuilder], and immutable afterwards.
#[derive(Clone)]
pub struct ReporterConfig {
    pub(crate) interval: Duration,
    pub(crate) align: bool,
    pub(crate) url: Url,
    pub(crate) bucket: String,
    pub(crate) measurement: String,
    pub(crate) organization: String,
    pub(crate) token: String,
    pub(crate) tags: Tags,
    pub(crate) health_check_interval: Duration,
}

impl ReporterConfig {
    /// Interval between report cycles.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether cycle timestamps are aligned to the report interval.
    pub fn align(&self) -> bool {
        self.align
    }

    /// Backend URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Bucket points are written to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Measurement name of every point.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Organization owning the bucket.
    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// Tags added to every point.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Interval between health checks.
    pub fn health_check_interval(&self) -> Duration {
        self.health_check_interval
    }
}

impl fmt::Debug for ReporterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReporterConfig")
            .field("interval", &self.interval)
            .field("align", &self.align)
            .field("url", &self.url.as_str())
            .field("bucket", &self.bucket)
            .field("measurement", &self.measurement)
            .field("organization", &self.organization)
            .field("token", &"<redacted>")
            .field("tags", &self.tags)
            .field("health_check_interval", &self.health_check_interval)
            .finish()
    }
}

/// Reports the metrics of a registry to InfluxDB.
///
/// The reporter runs two independent periodic activities: report cycles on the report interval, and health checks on
/// the health check interval. They share a single backend client, which the health check replaces whenever the
/// backend is not ready. Report cycles always use a complete client, either the old one or the new one.
pub struct InfluxDbReporter<R, K>
where
    K: Connect,
{
    registry: R,
    config: ReporterConfig,
    connector: K,
    client: ArcSwap<K::Client>,
}

impl<R, K> InfluxDbReporter<R, K>
where
    R: Registry,
    K: Connect,
{
    pub(crate) fn new(registry: R, config: ReporterConfig, connector: K) -> Self {
        let client = connector.connect(&config.url, &config.token);

        InfluxDbReporter { registry, config, connector, client: ArcSwap::from_pointee(client) }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    /// Returns the registry being reported.
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Returns the client currently in use.
    pub fn client(&self) -> Arc<K::Client> {
        self.client.load_full()
    }

    pub(crate) fn reconnect(&self) {
        let client = self.connector.connect(&self.config.url, &self.config.token);
        self.client.store(Arc::new(client));
    }

    /// Runs report cycles and health checks until `cancel` fires.
    ///
    /// Both run on the current task, interleaving whenever one of them is waiting on the backend, so a slow write
    /// never holds up a health check and vice versa. The first report cycle and the first health check happen one
    /// interval after starting.
    pub async fn run(&self, cancel: CancellationToken) {
        debug!(
            url = %self.config.url,
            bucket = %self.config.bucket,
            interval = ?self.config.interval,
            "Starting InfluxDB reporter."
        );

        tokio::join!(self.run_reports(&cancel), self.run_health_checks(&cancel));

        debug!("InfluxDB reporter stopped.");
    }
}

/// Creates an interval ticking every `period`, starting one period from now, that drops ticks it misses.
pub(crate) fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
