use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::{
    client::{http::HttpConnect, Connect},
    point::Tags,
    registry::Registry,
    reporter::{InfluxDbReporter, ReporterConfig},
};

const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_URL: &str = "http://localhost:8086";

/// Errors that could occur while building an InfluxDB reporter.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    /// Failed to parse the backend URL.
    #[error("unable to parse InfluxDB url {url}: {reason}")]
    InvalidUrl {
        /// The URL as given.
        url: String,

        /// Details about the parsing failure.
        reason: String,
    },

    /// The report interval was zero.
    #[error("report interval must be greater than zero")]
    ZeroInterval,

    /// The health check interval was zero.
    #[error("health check interval must be greater than zero")]
    ZeroHealthCheckInterval,

    /// A required setting was not provided.
    #[error("missing required setting: {0}")]
    MissingSetting(&'static str),
}

/// Builder for an InfluxDB reporter.
pub struct InfluxDbBuilder<R> {
    registry: R,
    interval: Duration,
    align: bool,
    url: String,
    bucket: String,
    measurement: String,
    organization: String,
    token: String,
    tags: Tags,
    health_check_interval: Duration,
    request_timeout: Duration,
}

impl<R> InfluxDbBuilder<R>
where
    R: Registry,
{
    /// Creates a builder reporting the metrics of `registry`.
    pub fn new(registry: R) -> Self {
        InfluxDbBuilder {
            registry,
            interval: DEFAULT_INTERVAL,
            align: false,
            url: DEFAULT_URL.to_string(),
            bucket: String::new(),
            measurement: String::new(),
            organization: String::new(),
            token: String::new(),
            tags: Tags::new(),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the interval between report cycles.
    ///
    /// Defaults to 10 seconds.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets whether cycle timestamps are aligned to the report interval.
    ///
    /// When enabled, the timestamp of every cycle is truncated down to a multiple of the report interval since the
    /// Unix epoch, so that points line up across hosts and restarts: with an interval of 30 seconds, every point lands
    /// on the minute or the half-minute.
    ///
    /// Defaults to `false`.
    #[must_use]
    pub fn with_alignment(mut self, align: bool) -> Self {
        self.align = align;
        self
    }

    /// Set the URL of the InfluxDB server.
    ///
    /// The URL is only parsed when building the reporter.
    ///
    /// Defaults to `http://localhost:8086`.
    #[must_use]
    pub fn with_url<U>(mut self, url: U) -> Self
    where
        U: Into<String>,
    {
        self.url = url.into();
        self
    }

    /// Set the bucket points are written to. Required.
    #[must_use]
    pub fn with_bucket<B>(mut self, bucket: B) -> Self
    where
        B: Into<String>,
    {
        self.bucket = bucket.into();
        self
    }

    /// Set the measurement name used for every point. Required.
    #[must_use]
    pub fn with_measurement<M>(mut self, measurement: M) -> Self
    where
        M: Into<String>,
    {
        self.measurement = measurement.into();
        self
    }

    /// Set the organization owning the bucket. Required.
    #[must_use]
    pub fn with_organization<O>(mut self, organization: O) -> Self
    where
        O: Into<String>,
    {
        self.organization = organization.into();
        self
    }

    /// Set the access token used to authenticate with InfluxDB.
    ///
    /// Defaults to no token.
    #[must_use]
    pub fn with_token<T>(mut self, token: T) -> Self
    where
        T: Into<String>,
    {
        self.token = token.into();
        self
    }

    /// Replace the tags added to every point.
    ///
    /// Compound metrics add a `bucket` tag on top of these. A base tag named `bucket` is therefore overridden on
    /// points of compound metrics.
    ///
    /// Defaults to no tags.
    #[must_use]
    pub fn with_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.tags = tags.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    /// Add a tag to every point.
    #[must_use]
    pub fn add_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the interval between health checks.
    ///
    /// Every health check that finds InfluxDB unreachable or not ready replaces the client.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the timeout for requests made by the default HTTP client.
    ///
    /// Has no effect when building with a custom connector.
    ///
    /// Defaults to 20 seconds.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn into_parts(self) -> Result<(R, ReporterConfig), BuildError> {
        let url = parse_url(&self.url)?;

        if self.interval.is_zero() {
            return Err(BuildError::ZeroInterval);
        }
        if self.health_check_interval.is_zero() {
            return Err(BuildError::ZeroHealthCheckInterval);
        }
        if self.bucket.is_empty() {
            return Err(BuildError::MissingSetting("bucket"));
        }
        if self.measurement.is_empty() {
            return Err(BuildError::MissingSetting("measurement"));
        }
        if self.organization.is_empty() {
            return Err(BuildError::MissingSetting("organization"));
        }

        let config = ReporterConfig {
            interval: self.interval,
            align: self.align,
            url,
            bucket: self.bucket,
            measurement: self.measurement,
            organization: self.organization,
            token: self.token,
            tags: self.tags,
            health_check_interval: self.health_check_interval,
        };

        Ok((self.registry, config))
    }

    /// Builds the reporter with the default HTTP client.
    ///
    /// The reporter must be run by the caller with [`InfluxDbReporter::run`].
    ///
    /// # Errors
    ///
    /// If the URL cannot be parsed, an interval is zero, or a required setting is missing, an error will be returned.
    pub fn build(self) -> Result<InfluxDbReporter<R, HttpConnect>, BuildError> {
        let request_timeout = self.request_timeout;
        let (registry, config) = self.into_parts()?;
        Ok(InfluxDbReporter::new(registry, config, HttpConnect::new(request_timeout)))
    }

    /// Builds the reporter, using `connector` to create backend clients.
    ///
    /// # Errors
    ///
    /// If the URL cannot be parsed, an interval is zero, or a required setting is missing, an error will be returned.
    pub fn build_with_connector<K>(self, connector: K) -> Result<InfluxDbReporter<R, K>, BuildError>
    where
        K: Connect,
    {
        let (registry, config) = self.into_parts()?;
        Ok(InfluxDbReporter::new(registry, config, connector))
    }
}

fn parse_url(url: &str) -> Result<Url, BuildError> {
    let invalid = |reason: String| BuildError::InvalidUrl { url: url.to_string(), reason };

    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(invalid(format!("unsupported scheme '{scheme}' (expected 'http' or 'https')"))),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::{BuildError, InfluxDbBuilder};
    use crate::{point::Tags, registry::MemoryRegistry};

    fn builder() -> InfluxDbBuilder<Arc<MemoryRegistry>> {
        InfluxDbBuilder::new(Arc::new(MemoryRegistry::new()))
            .with_bucket("metrics")
            .with_measurement("app")
            .with_organization("acme")
    }

    #[tokio::test]
    async fn builds_with_defaults() {
        let reporter = builder().build().unwrap();
        let config = reporter.config();

        assert_eq!(config.interval(), Duration::from_secs(10));
        assert_eq!(config.health_check_interval(), Duration::from_secs(5));
        assert!(!config.align());
        assert_eq!(config.url().as_str(), "http://localhost:8086/");
        assert_eq!(config.bucket(), "metrics");
        assert_eq!(config.measurement(), "app");
        assert_eq!(config.organization(), "acme");
        assert!(config.tags().is_empty());
    }

    #[tokio::test]
    async fn tags_are_collected() {
        let reporter = builder()
            .with_tags([("host", "web-1"), ("region", "eu")])
            .add_tag("region", "us")
            .with_token("s3cr3t")
            .build()
            .unwrap();

        let expected =
            Tags::from([("host".to_string(), "web-1".to_string()), ("region".to_string(), "us".to_string())]);
        assert_eq!(reporter.config().tags(), &expected);
        assert!(!format!("{:?}", reporter.config()).contains("s3cr3t"));
    }

    #[test]
    fn invalid_url_fails_fast() {
        let result = builder().with_url("not a url").build();
        assert!(matches!(result, Err(BuildError::InvalidUrl { url, .. }) if url == "not a url"));

        let result = builder().with_url("udp://localhost:8089").build();
        assert!(matches!(result, Err(BuildError::InvalidUrl { .. })));
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let result = builder().with_interval(Duration::ZERO).build();
        assert_eq!(result.err(), Some(BuildError::ZeroInterval));

        let result = builder().with_health_check_interval(Duration::ZERO).build();
        assert_eq!(result.err(), Some(BuildError::ZeroHealthCheckInterval));
    }

    #[test]
    fn required_settings() {
        let registry = Arc::new(MemoryRegistry::new());
        let result = InfluxDbBuilder::new(registry).with_measurement("app").with_organization("acme").build();
        assert_eq!(result.err(), Some(BuildError::MissingSetting("bucket")));

        let result = builder().with_measurement("").build();
        assert_eq!(result.err(), Some(BuildError::MissingSetting("measurement")));

        let result = builder().with_organization("").build();
        assert_eq!(result.err(), Some(BuildError::MissingSetting("organization")));
    }
}
