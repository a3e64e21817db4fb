//! A reporter that periodically sends the contents of a metrics registry to [InfluxDB][influxdb].
//!
//! [influxdb]: https://www.influxdata.com/
//!
//! # Usage
//!
//! ```no_run
//! # use std::{sync::Arc, time::Duration};
//! # use metrics_exporter_influxdb::{AtomicCounter, InfluxDbBuilder, MemoryRegistry, Metric};
//! # use tokio_util::sync::CancellationToken;
//! # async fn example() {
//! // Register metrics in a registry, and keep the handles around to update them.
//! let registry = Arc::new(MemoryRegistry::new());
//! let requests = Arc::new(AtomicCounter::new());
//! registry.register("requests", Metric::Counter(requests.clone())).expect("metric already registered");
//!
//! // Configure the reporter. The bucket, measurement and organization are required.
//! let reporter = InfluxDbBuilder::new(Arc::clone(&registry))
//!     .with_url("http://localhost:8086")
//!     .with_bucket("metrics")
//!     .with_measurement("my_app")
//!     .with_organization("acme")
//!     .with_token("my-token")
//!     .with_interval(Duration::from_secs(30))
//!     .with_alignment(true)
//!     .add_tag("host", "web-1")
//!     .build()
//!     .expect("invalid reporter configuration");
//!
//! // Run the reporter until the token is cancelled.
//! let cancel = CancellationToken::new();
//! reporter.run(cancel).await;
//! # }
//! ```
//!
//! # Points
//!
//! Every report cycle produces points that all share a single timestamp, and all belong to the configured
//! measurement. Each metric contributes fields named after it:
//!
//! - counters: one point with the field `<name>.count`
//! - gauges: one point with the field `<name>.gauge`
//! - histograms: one point per statistic (`count`, `max`, `mean`, `min`, `stddev`, `variance`, `p50`, `p75`, `p95`,
//!   `p99`, `p999`, `p9999`) with the field `<name>.histogram`, and the statistic in the `bucket` tag
//! - meters: one point per rate (`count`, `m1`, `m5`, `m15`, `mean`) with the field `<name>.meter`
//! - timers: the histogram statistics plus the meter rates, with the mean rate tagged `meanrate`, under the field
//!   `<name>.timer`
//!
//! # Failure handling
//!
//! Write failures are logged and the cycle is abandoned; nothing is buffered or retried. Independently of report
//! cycles, the reporter checks every 5 seconds whether InfluxDB is ready, and replaces its client whenever it isn't.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::error;

mod builder;
pub use self::builder::{BuildError, InfluxDbBuilder};

pub mod client;
pub use self::client::{Client, ClientError, Connect, WriteApi};

mod monitor;

mod point;
pub use self::point::{encode_batch, FieldValue, Point, PointError, Tags};

pub mod registry;
pub use self::registry::{
    AtomicCounter, AtomicGauge, AtomicGaugeFloat, MemoryRegistry, Metric, MeterSnapshot, Registry, RegistryError,
};

mod reporter;
pub use self::reporter::{InfluxDbReporter, ReporterConfig};

mod sample;
pub use self::sample::{SampleSnapshot, SampleTimerSnapshot};

mod scheduler;
pub use self::scheduler::{collect, cycle_timestamp};

mod transform;
pub use self::transform::{bucket_tags, transform, BUCKET_TAG, QUANTILES};

/// Reports the metrics of `registry` to InfluxDB every `interval` until `cancel` fires.
///
/// If the reporter cannot be built, most likely because `url` cannot be parsed, the error is logged and this returns
/// immediately without reporting anything.
#[allow(clippy::too_many_arguments)]
pub async fn influxdb<R>(
    cancel: CancellationToken,
    registry: R,
    interval: Duration,
    url: &str,
    bucket: &str,
    measurement: &str,
    organization: &str,
    token: &str,
    align: bool,
) where
    R: Registry,
{
    influxdb_with_tags(cancel, registry, interval, url, bucket, measurement, organization, token, Tags::new(), align)
        .await;
}

/// Reports the metrics of `registry` to InfluxDB every `interval` until `cancel` fires, adding `tags` to every point.
///
/// If the reporter cannot be built, most likely because `url` cannot be parsed, the error is logged and this returns
/// immediately without reporting anything.
#[allow(clippy::too_many_arguments)]
pub async fn influxdb_with_tags<R>(
    cancel: CancellationToken,
    registry: R,
    interval: Duration,
    url: &str,
    bucket: &str,
    measurement: &str,
    organization: &str,
    token: &str,
    tags: Tags,
    align: bool,
) where
    R: Registry,
{
    let result = InfluxDbBuilder::new(registry)
        .with_interval(interval)
        .with_url(url)
        .with_bucket(bucket)
        .with_measurement(measurement)
        .with_organization(organization)
        .with_token(token)
        .with_tags(tags)
        .with_alignment(align)
        .build();

    match result {
        Ok(reporter) => reporter.run(cancel).await,
        Err(e) => error!(error = %e, "Unable to start InfluxDB reporter."),
    }
}
