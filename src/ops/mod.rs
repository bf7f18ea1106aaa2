//! Operations and observability.
//!
//! - [`metrics`] - Discovery server counters

pub mod metrics;
