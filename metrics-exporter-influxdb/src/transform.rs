//! Conversion of metric snapshots into points.
//!
//! Scalar metrics (counters and gauges) become a single point with one field, keyed `<name>.count` or `<name>.gauge`.
//!
//! Compound metrics (histograms, meters, and timers) fan out into one point per statistic. Every point for a given
//! metric shares the same field key, `<name>.histogram`, `<name>.meter`, or `<name>.timer`, and the statistic is
//! carried in a `bucket` tag instead, such as `bucket=p95` or `bucket=m1`.

use std::time::SystemTime;

use tracing::trace;

use crate::{
    point::{FieldValue, Point, Tags},
    registry::{HistogramSnapshot, MeterSnapshot, Metric},
};

/// Tag key identifying which statistic a point of a compound metric holds.
pub const BUCKET_TAG: &str = "bucket";

/// Quantiles reported for distributions, along with the bucket tag of each.
pub const QUANTILES: [(f64, &str); 6] = [
    (0.5, "p50"),
    (0.75, "p75"),
    (0.95, "p95"),
    (0.99, "p99"),
    (0.999, "p999"),
    (0.9999, "p9999"),
];

/// Builds points for a single metric.
///
/// All points share the measurement, base tags, and timestamp of the report cycle.
pub(crate) struct PointFactory<'a> {
    measurement: &'a str,
    base_tags: &'a Tags,
    timestamp: SystemTime,
}

impl<'a> PointFactory<'a> {
    pub fn new(measurement: &'a str, base_tags: &'a Tags, timestamp: SystemTime) -> Self {
        PointFactory { measurement, base_tags, timestamp }
    }

    fn point<V>(&self, field_key: String, value: V) -> Point
    where
        V: Into<FieldValue>,
    {
        Point::new(self.measurement, self.timestamp).with_tags(self.base_tags).with_field(field_key, value)
    }

    fn bucketed_point(&self, field_key: &str, bucket: &str, value: f64) -> Point {
        Point::new(self.measurement, self.timestamp)
            .with_tags(&bucket_tags(bucket, self.base_tags))
            .with_field(field_key, value)
    }
}

/// Returns a copy of `base_tags` with the bucket tag set to `bucket`.
pub fn bucket_tags(bucket: &str, base_tags: &Tags) -> Tags {
    let mut tags = base_tags.clone();
    tags.insert(BUCKET_TAG.to_string(), bucket.to_string());
    tags
}

/// Converts one metric into points.
///
/// Kinds that can't be reported produce no points.
pub fn transform(
    name: &str,
    metric: &Metric,
    measurement: &str,
    base_tags: &Tags,
    timestamp: SystemTime,
) -> Vec<Point> {
    let mut points = Vec::new();
    transform_into(&PointFactory::new(measurement, base_tags, timestamp), name, metric, &mut points);
    points
}

/// Converts one metric into points, appending them to `points`.
pub(crate) fn transform_into(factory: &PointFactory<'_>, name: &str, metric: &Metric, points: &mut Vec<Point>) {
    match metric {
        Metric::Counter(counter) => {
            points.push(factory.point(format!("{name}.count"), counter.snapshot()));
        }
        Metric::Gauge(gauge) => {
            points.push(factory.point(format!("{name}.gauge"), gauge.snapshot()));
        }
        Metric::GaugeFloat(gauge) => {
            points.push(factory.point(format!("{name}.gauge"), gauge.snapshot()));
        }
        Metric::Histogram(histogram) => {
            let field_key = format!("{name}.histogram");
            let snapshot = histogram.snapshot();
            for (bucket, value) in distribution_stats(&*snapshot) {
                points.push(factory.bucketed_point(&field_key, bucket, value));
            }
        }
        Metric::Meter(meter) => {
            let field_key = format!("{name}.meter");
            for (bucket, value) in rate_stats(&meter.snapshot(), "mean", true) {
                points.push(factory.bucketed_point(&field_key, bucket, value));
            }
        }
        Metric::Timer(timer) => {
            let field_key = format!("{name}.timer");
            let snapshot = timer.snapshot();
            let rates = snapshot.rates();

            // The count already comes with the distribution, and the mean rate is renamed so it doesn't collide with
            // the distribution's mean.
            let stats = distribution_stats(&*snapshot).into_iter().chain(rate_stats(&rates, "meanrate", false));
            for (bucket, value) in stats {
                points.push(factory.bucketed_point(&field_key, bucket, value));
            }
        }
        Metric::Other(kind) => {
            trace!(metric_name = name, kind, "Skipping metric of unsupported kind.");
        }
    }
}

fn distribution_stats<S>(snapshot: &S) -> Vec<(&'static str, f64)>
where
    S: HistogramSnapshot + ?Sized,
{
    let quantiles: Vec<f64> = QUANTILES.iter().map(|(q, _)| *q).collect();
    let percentiles = snapshot.percentiles(&quantiles);

    let mut stats = vec![
        ("count", snapshot.count() as f64),
        ("max", snapshot.max() as f64),
        ("mean", snapshot.mean()),
        ("min", snapshot.min() as f64),
        ("stddev", snapshot.std_dev()),
        ("variance", snapshot.variance()),
    ];
    stats.extend(QUANTILES.iter().zip(percentiles).map(|((_, bucket), value)| (*bucket, value)));
    stats
}

fn rate_stats(snapshot: &MeterSnapshot, mean_bucket: &'static str, with_count: bool) -> Vec<(&'static str, f64)> {
    let mut stats = Vec::with_capacity(5);
    if with_count {
        stats.push(("count", snapshot.count as f64));
    }
    stats.extend([
        ("m1", snapshot.rate1),
        ("m5", snapshot.rate5),
        ("m15", snapshot.rate15),
        (mean_bucket, snapshot.rate_mean),
    ]);
    stats
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeSet,
        sync::Arc,
        time::{Duration, SystemTime},
    };

    use super::{bucket_tags, transform, BUCKET_TAG};
    use crate::{
        point::{FieldValue, Point, Tags},
        registry::{
            AtomicCounter, AtomicGauge, AtomicGaugeFloat, Histogram, HistogramSnapshot, Meter, MeterSnapshot, Metric,
            Timer, TimerSnapshot,
        },
        sample::{SampleSnapshot, SampleTimerSnapshot},
    };

    const RATES: MeterSnapshot = MeterSnapshot { count: 7, rate1: 1.0, rate5: 5.0, rate15: 15.0, rate_mean: 0.5 };

    struct FixedHistogram(Vec<i64>);

    impl Histogram for FixedHistogram {
        fn snapshot(&self) -> Box<dyn HistogramSnapshot> {
            Box::new(SampleSnapshot::new(self.0.clone()))
        }
    }

    struct FixedMeter;

    impl Meter for FixedMeter {
        fn snapshot(&self) -> MeterSnapshot {
            RATES
        }
    }

    struct FixedTimer(Vec<i64>);

    impl Timer for FixedTimer {
        fn snapshot(&self) -> Box<dyn TimerSnapshot> {
            Box::new(SampleTimerSnapshot::new(SampleSnapshot::new(self.0.clone()), RATES))
        }
    }

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn base_tags() -> Tags {
        Tags::from([("host".to_string(), "web-1".to_string())])
    }

    fn buckets(points: &[Point]) -> BTreeSet<String> {
        points.iter().filter_map(|p| p.tag(BUCKET_TAG)).map(str::to_string).collect()
    }

    fn value_of(points: &[Point], bucket: &str, field_key: &str) -> Option<FieldValue> {
        points.iter().find(|p| p.tag(BUCKET_TAG) == Some(bucket)).and_then(|p| p.field(field_key))
    }

    fn expected(buckets: &[&str]) -> BTreeSet<String> {
        buckets.iter().map(|b| b.to_string()).collect()
    }

    #[test]
    fn counter_yields_single_untagged_point() {
        let counter = Arc::new(AtomicCounter::new());
        counter.increment(42);

        let points = transform("requests", &Metric::Counter(counter), "app", &base_tags(), now());
        assert_eq!(points.len(), 1);

        let point = &points[0];
        assert_eq!(point.measurement(), "app");
        assert_eq!(point.field("requests.count"), Some(FieldValue::Integer(42)));
        assert_eq!(point.fields().len(), 1);
        assert_eq!(point.tag(BUCKET_TAG), None);
        assert_eq!(point.tags(), &base_tags());
        assert_eq!(point.timestamp(), now());
    }

    #[test]
    fn gauges_keep_their_value_type() {
        let gauge = Arc::new(AtomicGauge::new());
        gauge.update(-3);
        let points = transform("queue", &Metric::Gauge(gauge), "app", &Tags::new(), now());
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].field("queue.gauge"), Some(FieldValue::Integer(-3)));

        let gauge = Arc::new(AtomicGaugeFloat::new());
        gauge.update(0.75);
        let points = transform("load", &Metric::GaugeFloat(gauge), "app", &Tags::new(), now());
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].field("load.gauge"), Some(FieldValue::Float(0.75)));
    }

    #[test]
    fn histogram_fans_out_one_point_per_statistic() {
        let histogram = Arc::new(FixedHistogram((1..=100).collect()));
        let points = transform("latency", &Metric::Histogram(histogram), "app", &base_tags(), now());

        assert_eq!(points.len(), 12);
        assert_eq!(
            buckets(&points),
            expected(&[
                "count", "max", "mean", "min", "stddev", "variance", "p50", "p75", "p95", "p99", "p999", "p9999"
            ])
        );
        for point in &points {
            assert_eq!(point.fields().len(), 1);
            assert!(point.field("latency.histogram").is_some());
            assert_eq!(point.tag("host"), Some("web-1"));
            assert_eq!(point.timestamp(), now());
        }

        assert_eq!(value_of(&points, "count", "latency.histogram"), Some(FieldValue::Float(100.0)));
        assert_eq!(value_of(&points, "min", "latency.histogram"), Some(FieldValue::Float(1.0)));
        assert_eq!(value_of(&points, "max", "latency.histogram"), Some(FieldValue::Float(100.0)));
        assert_eq!(value_of(&points, "mean", "latency.histogram"), Some(FieldValue::Float(50.5)));
        assert_eq!(value_of(&points, "p50", "latency.histogram"), Some(FieldValue::Float(50.5)));
        assert_eq!(value_of(&points, "p75", "latency.histogram"), Some(FieldValue::Float(75.75)));
    }

    #[test]
    fn meter_fans_out_rates() {
        let points = transform("hits", &Metric::Meter(Arc::new(FixedMeter)), "app", &Tags::new(), now());

        assert_eq!(points.len(), 5);
        assert_eq!(buckets(&points), expected(&["count", "m1", "m5", "m15", "mean"]));
        assert_eq!(value_of(&points, "count", "hits.meter"), Some(FieldValue::Float(7.0)));
        assert_eq!(value_of(&points, "m15", "hits.meter"), Some(FieldValue::Float(15.0)));
        assert_eq!(value_of(&points, "mean", "hits.meter"), Some(FieldValue::Float(0.5)));
    }

    #[test]
    fn timer_renames_mean_rate() {
        let timer = Arc::new(FixedTimer(vec![10, 20, 30]));
        let points = transform("db", &Metric::Timer(timer), "app", &Tags::new(), now());

        assert_eq!(points.len(), 16);
        assert_eq!(
            buckets(&points),
            expected(&[
                "count", "max", "mean", "min", "stddev", "variance", "p50", "p75", "p95", "p99", "p999", "p9999", "m1",
                "m5", "m15", "meanrate",
            ])
        );

        // Distribution count, not the meter's.
        assert_eq!(value_of(&points, "count", "db.timer"), Some(FieldValue::Float(3.0)));
        assert_eq!(value_of(&points, "mean", "db.timer"), Some(FieldValue::Float(20.0)));
        assert_eq!(value_of(&points, "meanrate", "db.timer"), Some(FieldValue::Float(0.5)));
    }

    #[test]
    fn unsupported_kinds_are_skipped() {
        let points = transform("check", &Metric::Other("healthcheck"), "app", &base_tags(), now());
        assert!(points.is_empty());
    }

    #[test]
    fn bucket_tag_is_merged_with_base_tags() {
        let mut base = base_tags();
        base.insert("region".to_string(), "eu".to_string());

        let tags = bucket_tags("p99", &base);
        assert_eq!(tags.len(), 3);
        assert_eq!(tags.get("host").map(String::as_str), Some("web-1"));
        assert_eq!(tags.get("region").map(String::as_str), Some("eu"));
        assert_eq!(tags.get(BUCKET_TAG).map(String::as_str), Some("p99"));

        // The base tags are left untouched.
        assert_eq!(base.len(), 2);
    }
}
