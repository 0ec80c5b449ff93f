//! headroom-metrics: point-in-time metric sampling.
//!
//! # Architecture
//!
//! ```text
//! Sampler (one value per MetricRule, gauge or delta)
//!   └── MetricSource::sample(query) -> f64
//!         └── PrometheusClient  GET {base}/api/v1/query?query=...
//! ```
//!
//! An empty result set samples as `0.0`. That keeps the loop running when
//! an exporter is briefly absent, but it also means "no data" and a real
//! zero are indistinguishable to the evaluator.

pub mod error;
pub mod prometheus;
pub mod sampler;
pub mod source;

pub use error::{QueryError, SampleError};
pub use prometheus::PrometheusClient;
pub use sampler::Sampler;
pub use source::{MetricSource, SampleFuture};
