use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime},
};

use influxdb_line_protocol::LineProtocolBuilder;
use thiserror::Error;
use tracing::warn;

/// A set of tags, ordered by key.
pub type Tags = BTreeMap<String, String>;

/// A field value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FieldValue {
    /// A signed integer.
    Integer(i64),

    /// A floating-point number.
    Float(f64),
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// Errors that can occur when encoding a point.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PointError {
    /// The point has no fields that can be represented in line protocol.
    ///
    /// Line protocol requires at least one field, and cannot represent NaN or infinite floats.
    #[error("point in measurement '{0}' has no encodable fields")]
    NoFields(String),
}

/// A single time-series data point.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    measurement: String,
    tags: Tags,
    fields: BTreeMap<String, FieldValue>,
    timestamp: SystemTime,
}

impl Point {
    /// Creates a point with no tags or fields.
    pub fn new<M>(measurement: M, timestamp: SystemTime) -> Self
    where
        M: Into<String>,
    {
        Point { measurement: measurement.into(), tags: Tags::new(), fields: BTreeMap::new(), timestamp }
    }

    /// Adds every tag in `tags`, replacing existing tags with the same key.
    #[must_use]
    pub fn with_tags(mut self, tags: &Tags) -> Self {
        self.tags.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Adds a tag, replacing any existing tag with the same key.
    #[must_use]
    pub fn with_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a field, replacing any existing field with the same key.
    #[must_use]
    pub fn with_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns the measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Returns the tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Returns the value of the tag with the given key, if present.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Returns the fields.
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Returns the value of the field with the given key, if present.
    pub fn field(&self, key: &str) -> Option<FieldValue> {
        self.fields.get(key).copied()
    }

    /// Returns the timestamp.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Encodes the point as a single line of line protocol, including the trailing newline.
    ///
    /// Non-finite float fields are left out of the line.
    ///
    /// # Errors
    ///
    /// If the point has no fields left to encode, an error is returned.
    pub fn to_line_protocol(&self) -> Result<Vec<u8>, PointError> {
        let mut fields = self.fields.iter().filter(|(_, value)| match value {
            FieldValue::Integer(_) => true,
            FieldValue::Float(f) => f.is_finite(),
        });

        let Some((first_key, first_value)) = fields.next() else {
            return Err(PointError::NoFields(self.measurement.clone()));
        };

        let mut builder = LineProtocolBuilder::new().measurement(&self.measurement);
        for (key, value) in &self.tags {
            builder = builder.tag(key, value);
        }

        let mut builder = match *first_value {
            FieldValue::Integer(i) => builder.field(first_key, i),
            FieldValue::Float(f) => builder.field(first_key, f),
        };
        for (key, value) in fields {
            builder = match *value {
                FieldValue::Integer(i) => builder.field(key, i),
                FieldValue::Float(f) => builder.field(key, f),
            };
        }

        Ok(builder.timestamp(unix_nanos(self.timestamp)).close_line().build())
    }
}

/// Encodes a batch of points as line protocol.
///
/// Points that cannot be encoded are dropped with a warning; the rest of the batch is still encoded.
pub fn encode_batch(points: &[Point]) -> Vec<u8> {
    let mut buf = Vec::new();
    for point in points {
        match point.to_line_protocol() {
            Ok(line) => buf.extend_from_slice(&line),
            Err(e) => warn!(error = %e, "Dropping point that cannot be encoded."),
        }
    }
    buf
}

/// Returns the signed number of nanoseconds between the Unix epoch and `timestamp`.
pub(crate) fn unix_nanos(timestamp: SystemTime) -> i64 {
    match timestamp.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(since) => duration_nanos(since),
        Err(e) => -duration_nanos(e.duration()),
    }
}

fn duration_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::{encode_batch, unix_nanos, Point, PointError};

    fn at(nanos: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_nanos(nanos)
    }

    #[test]
    fn encodes_tags_sorted_and_typed_fields() {
        let point = Point::new("app", at(1_609_459_200_000_000_000))
            .with_tag("region", "us-west")
            .with_tag("host", "server1")
            .with_field("requests.count", 42_i64)
            .with_field("load.gauge", 0.5_f64);

        let line = String::from_utf8(point.to_line_protocol().unwrap()).unwrap();
        assert_eq!(
            line,
            "app,host=server1,region=us-west load.gauge=0.5,requests.count=42i 1609459200000000000\n"
        );
    }

    #[test]
    fn escapes_special_characters() {
        let point = Point::new("my app", at(1)).with_tag("tag key", "a,b=c").with_field("f", 1_i64);

        let line = String::from_utf8(point.to_line_protocol().unwrap()).unwrap();
        assert_eq!(line, "my\\ app,tag\\ key=a\\,b\\=c f=1i 1\n");
    }

    #[test]
    fn non_finite_fields_are_dropped() {
        let point = Point::new("app", at(1)).with_field("a", f64::NAN).with_field("b", 2.5_f64);
        let line = String::from_utf8(point.to_line_protocol().unwrap()).unwrap();
        assert_eq!(line, "app b=2.5 1\n");

        let point = Point::new("app", at(1)).with_field("a", f64::INFINITY);
        assert_eq!(point.to_line_protocol(), Err(PointError::NoFields("app".to_string())));
    }

    #[test]
    fn batch_skips_unencodable_points() {
        let points = vec![
            Point::new("app", at(1)).with_field("a", 1_i64),
            Point::new("app", at(2)),
            Point::new("app", at(3)).with_field("b", 2_i64),
        ];

        let batch = String::from_utf8(encode_batch(&points)).unwrap();
        assert_eq!(batch, "app a=1i 1\napp b=2i 3\n");
    }

    #[test]
    fn timestamps_before_epoch_are_negative() {
        let before = SystemTime::UNIX_EPOCH - Duration::from_secs(1);
        assert_eq!(unix_nanos(before), -1_000_000_000);
        assert_eq!(unix_nanos(at(5)), 5);
    }
}
