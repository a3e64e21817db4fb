//! The boundary between the reporter and the metrics registry it reads from.
//!
//! The reporter does not care how metrics compute their statistics. It only needs to walk a [`Registry`] once per
//! report cycle and take a snapshot of every metric it finds. Each metric is exposed as a [`Metric`], a closed set of
//! the kinds the reporter knows how to turn into points, plus [`Metric::Other`] for anything else a registry may hold.
//!
//! [`MemoryRegistry`] and the atomic scalar metrics are provided for applications that don't already have a registry
//! of their own.

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use thiserror::Error;

/// A source of named metrics.
///
/// Implementations must be safe to read from while the application is concurrently updating metrics.
pub trait Registry: Send + Sync {
    /// Calls `f` once for every metric currently registered.
    ///
    /// Iteration order is unspecified.
    fn each(&self, f: &mut dyn FnMut(&str, &Metric));
}

impl<R> Registry for Arc<R>
where
    R: Registry + ?Sized,
{
    fn each(&self, f: &mut dyn FnMut(&str, &Metric)) {
        (**self).each(f);
    }
}

/// A monotonic (or at least integral) count of events.
pub trait Counter: Send + Sync {
    /// Returns the current count.
    fn snapshot(&self) -> i64;
}

/// An instantaneous integral value.
pub trait Gauge: Send + Sync {
    /// Returns the current value.
    fn snapshot(&self) -> i64;
}

/// An instantaneous floating-point value.
pub trait GaugeFloat: Send + Sync {
    /// Returns the current value.
    fn snapshot(&self) -> f64;
}

/// A distribution of values.
pub trait Histogram: Send + Sync {
    /// Takes an immutable snapshot of the distribution.
    fn snapshot(&self) -> Box<dyn HistogramSnapshot>;
}

/// A rate of events.
pub trait Meter: Send + Sync {
    /// Takes a snapshot of the current rates.
    fn snapshot(&self) -> MeterSnapshot;
}

/// A distribution of durations together with the rate at which they occur.
pub trait Timer: Send + Sync {
    /// Takes an immutable snapshot of the distribution and rates.
    fn snapshot(&self) -> Box<dyn TimerSnapshot>;
}

/// An immutable read of a distribution.
pub trait HistogramSnapshot: Send {
    /// Number of values recorded.
    fn count(&self) -> i64;

    /// Smallest value recorded.
    fn min(&self) -> i64;

    /// Largest value recorded.
    fn max(&self) -> i64;

    /// Arithmetic mean of the values.
    fn mean(&self) -> f64;

    /// Standard deviation of the values.
    fn std_dev(&self) -> f64;

    /// Variance of the values.
    fn variance(&self) -> f64;

    /// Returns the value at each of the given quantiles, in the same order.
    ///
    /// Quantiles are in the range `[0.0, 1.0]`.
    fn percentiles(&self, quantiles: &[f64]) -> Vec<f64>;
}

/// An immutable read of a timer: a distribution plus the rates of a meter.
pub trait TimerSnapshot: HistogramSnapshot {
    /// Snapshot of the rate at which values were recorded.
    fn rates(&self) -> MeterSnapshot;
}

/// Rates of a meter at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeterSnapshot {
    /// Total number of events.
    pub count: i64,

    /// One-minute moving average rate, in events per second.
    pub rate1: f64,

    /// Five-minute moving average rate, in events per second.
    pub rate5: f64,

    /// Fifteen-minute moving average rate, in events per second.
    pub rate15: f64,

    /// Mean rate since the meter was created, in events per second.
    pub rate_mean: f64,
}

/// A registered metric, by kind.
#[derive(Clone)]
pub enum Metric {
    /// A counter.
    Counter(Arc<dyn Counter>),

    /// An integral gauge.
    Gauge(Arc<dyn Gauge>),

    /// A floating-point gauge.
    GaugeFloat(Arc<dyn GaugeFloat>),

    /// A histogram.
    Histogram(Arc<dyn Histogram>),

    /// A meter.
    Meter(Arc<dyn Meter>),

    /// A timer.
    Timer(Arc<dyn Timer>),

    /// A kind of metric the reporter does not know how to report, such as a health check.
    ///
    /// The string names the kind, for diagnostics only.
    Other(&'static str),
}

impl Metric {
    /// Returns a short name for the kind of this metric.
    pub const fn kind(&self) -> &'static str {
        match self {
            Metric::Counter(_) => "counter",
            Metric::Gauge(_) => "gauge",
            Metric::GaugeFloat(_) => "gauge_float",
            Metric::Histogram(_) => "histogram",
            Metric::Meter(_) => "meter",
            Metric::Timer(_) => "timer",
            Metric::Other(kind) => kind,
        }
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Metric").field(&self.kind()).finish()
    }
}

/// Errors that can occur when registering a metric.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A metric is already registered under the given name.
    #[error("duplicate metric: {0}")]
    DuplicateMetric(String),
}

/// A simple, name-keyed registry held in memory.
///
/// Reads take a shared lock, so the reporter walking the registry never blocks applications updating metric values:
/// those go straight to the metric handles.
#[derive(Default)]
pub struct MemoryRegistry {
    metrics: RwLock<HashMap<String, Metric>>,
}

impl MemoryRegistry {
    /// Creates an empty `MemoryRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `metric` under `name`.
    ///
    /// # Errors
    ///
    /// If a metric is already registered under `name`, an error is returned and the registry is left unchanged.
    pub fn register<N>(&self, name: N, metric: Metric) -> Result<(), RegistryError>
    where
        N: Into<String>,
    {
        match self.metrics.write().entry(name.into()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateMetric(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(metric);
                Ok(())
            }
        }
    }

    /// Returns the metric registered under `name`, registering the one built by `init` if there is none.
    pub fn get_or_register<N, F>(&self, name: N, init: F) -> Metric
    where
        N: Into<String>,
        F: FnOnce() -> Metric,
    {
        self.metrics.write().entry(name.into()).or_insert_with(init).clone()
    }

    /// Returns the metric registered under `name`, if any.
    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics.read().get(name).cloned()
    }

    /// Removes the metric registered under `name`, returning it.
    pub fn unregister(&self, name: &str) -> Option<Metric> {
        self.metrics.write().remove(name)
    }

    /// Returns the number of registered metrics.
    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    /// Returns `true` if no metrics are registered.
    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }
}

impl Registry for MemoryRegistry {
    fn each(&self, f: &mut dyn FnMut(&str, &Metric)) {
        let metrics = self.metrics.read();
        for (name, metric) in metrics.iter() {
            f(name, metric);
        }
    }
}

/// A counter backed by an atomic integer.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicI64);

impl AtomicCounter {
    /// Creates a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `value` to the counter.
    pub fn increment(&self, value: i64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    /// Subtracts `value` from the counter.
    pub fn decrement(&self, value: i64) {
        self.0.fetch_sub(value, Ordering::Relaxed);
    }

    /// Resets the counter to zero.
    pub fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

impl Counter for AtomicCounter {
    fn snapshot(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge backed by an atomic integer.
#[derive(Debug, Default)]
pub struct AtomicGauge(AtomicI64);

impl AtomicGauge {
    /// Creates a gauge set to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gauge to `value`.
    pub fn update(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }
}

impl Gauge for AtomicGauge {
    fn snapshot(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A floating-point gauge, stored as the bit pattern of an `f64` in an atomic integer.
#[derive(Debug, Default)]
pub struct AtomicGaugeFloat(AtomicU64);

impl AtomicGaugeFloat {
    /// Creates a gauge set to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the gauge to `value`.
    pub fn update(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl GaugeFloat for AtomicGaugeFloat {
    fn snapshot(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}
