//! The metric source seam.

use std::future::Future;
use std::pin::Pin;

use crate::error::QueryError;

/// Boxed future alias for a single metric query.
pub type SampleFuture<'a> = Pin<Box<dyn Future<Output = Result<f64, QueryError>> + Send + 'a>>;

/// Anything that can turn a query string into one number.
///
/// Implementations bound their own network time; a stalled backend must
/// surface as [`QueryError::Timeout`] rather than block the caller.
pub trait MetricSource: Send + Sync {
    fn sample<'a>(&'a self, query: &'a str) -> SampleFuture<'a>;
}
