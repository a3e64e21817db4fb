//! The boundary between the reporter and the time-series backend.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::point::Point;

pub mod http;

/// Errors that can occur while talking to the backend.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be built or sent.
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,

        /// Response body, as text.
        body: String,
    },

    /// The backend did not answer in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The points could not be encoded for the backend.
    #[error("failed to encode points: {0}")]
    Encode(String),
}

/// A connection to the time-series backend.
#[async_trait]
pub trait Client: Send + Sync + 'static {
    /// Writes a batch of points to `bucket` in `organization`.
    ///
    /// Points accepted by the backend before an error occurred are not rolled back.
    async fn write_points(&self, organization: &str, bucket: &str, points: &[Point]) -> Result<(), ClientError>;

    /// Commits points the client buffers on its own side.
    ///
    /// Called once every time a [`WriteApi`] is flushed, after its points were written, even if it held none. The
    /// default does nothing, for clients that send points as soon as they are written.
    async fn flush(&self, _organization: &str, _bucket: &str) -> Result<(), ClientError> {
        Ok(())
    }

    /// Checks whether the backend is reachable and ready to accept writes.
    async fn ready(&self) -> Result<bool, ClientError>;

    /// Returns a batch handle for writing points to `bucket` in `organization`.
    fn write_api<'a>(&'a self, organization: &'a str, bucket: &'a str) -> WriteApi<'a, Self>
    where
        Self: Sized,
    {
        WriteApi::new(self, organization, bucket)
    }
}

/// Builds backend clients.
///
/// The reporter builds one client at startup, and a brand new one every time the health check finds the current
/// client is no longer healthy.
pub trait Connect: Send + Sync + 'static {
    /// Client type built by this connector.
    type Client: Client;

    /// Builds a client for the backend at `url`, authenticating with `token`.
    ///
    /// Building a client never fails: whether the backend can actually be reached is only known once the client is
    /// used.
    fn connect(&self, url: &Url, token: &str) -> Self::Client;
}

/// A batch of points buffered for a single bucket.
///
/// Points are only sent when the batch is flushed.
pub struct WriteApi<'a, C> {
    client: &'a C,
    organization: &'a str,
    bucket: &'a str,
    points: Vec<Point>,
}

impl<'a, C> WriteApi<'a, C>
where
    C: Client,
{
    /// Creates an empty batch.
    pub fn new(client: &'a C, organization: &'a str, bucket: &'a str) -> Self {
        WriteApi { client, organization, bucket, points: Vec::new() }
    }

    /// Buffers a point.
    pub fn write_point(&mut self, point: Point) {
        self.points.push(point);
    }

    /// Buffers every point in `points`.
    pub fn write_points<I>(&mut self, points: I)
    where
        I: IntoIterator<Item = Point>,
    {
        self.points.extend(points);
    }

    /// Returns the number of buffered points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns `true` if no points are buffered.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sends all buffered points to the backend, emptying the batch, then flushes the client.
    ///
    /// Flushing an empty batch writes nothing, but still flushes the client.
    ///
    /// # Errors
    ///
    /// If the backend could not be reached or refused the write, an error is returned. The buffered points are
    /// dropped either way.
    pub async fn flush(&mut self) -> Result<(), ClientError> {
        if !self.points.is_empty() {
            let points = std::mem::take(&mut self.points);
            self.client.write_points(self.organization, self.bucket, &points).await?;
        }

        self.client.flush(self.organization, self.bucket).await
    }
}
