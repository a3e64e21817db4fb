use std::{sync::Arc, time::Duration};

use metrics_exporter_influxdb::{
    registry::{Counter, Histogram, HistogramSnapshot},
    AtomicCounter, AtomicGaugeFloat, InfluxDbBuilder, MemoryRegistry, Metric, SampleSnapshot,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Keeps every value recorded since the last snapshot.
#[derive(Default)]
struct WindowHistogram {
    values: Mutex<Vec<i64>>,
}

impl WindowHistogram {
    fn record(&self, value: i64) {
        self.values.lock().push(value);
    }
}

impl Histogram for WindowHistogram {
    fn snapshot(&self) -> Box<dyn HistogramSnapshot> {
        let values = std::mem::take(&mut *self.values.lock());
        Box::new(SampleSnapshot::new(values))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let registry = Arc::new(MemoryRegistry::new());

    let server_loops = Arc::new(AtomicCounter::new());
    let lucky_ratio = Arc::new(AtomicGaugeFloat::new());
    let loop_delta_us = Arc::new(WindowHistogram::default());

    registry.register("tcp_server_loops", Metric::Counter(server_loops.clone())).expect("duplicate metric");
    registry.register("lucky_ratio", Metric::GaugeFloat(lucky_ratio.clone())).expect("duplicate metric");
    registry.register("tcp_server_loop_delta_us", Metric::Histogram(loop_delta_us.clone())).expect("duplicate metric");

    let reporter = InfluxDbBuilder::new(Arc::clone(&registry))
        .with_url("http://localhost:8086")
        .with_bucket("metrics")
        .with_measurement("example")
        .with_organization("example")
        .with_token(std::env::var("INFLUXDB_TOKEN").unwrap_or_default())
        .with_interval(Duration::from_secs(5))
        .with_alignment(true)
        .add_tag("system", "foo")
        .build()
        .expect("failed to build InfluxDB reporter");

    let cancel = CancellationToken::new();
    let reporter_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { reporter.run(cancel).await }
    });

    // Pretend to do some work until interrupted.
    let mut lucky = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            () = tokio::time::sleep(Duration::from_millis(10)) => {}
        }

        server_loops.increment(1);
        loop_delta_us.record(rand::random_range(0..1_000));

        if rand::random_bool(0.75) {
            lucky += 1;
        }
        let loops = server_loops.snapshot();
        lucky_ratio.update(lucky as f64 / loops as f64);
    }

    cancel.cancel();
    reporter_task.await.expect("reporter task panicked");
}
