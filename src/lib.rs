//! Request lifecycle coordination for HTTP clients.
//!
//! A [`Coordinator`] submits requests through a pluggable transport, cancels
//! superseded requests per endpoint, records activity and settlement history,
//! and folds successful responses into a normalized storage snapshot.

pub mod config;
pub mod core;
pub mod hook;
pub mod logging;
pub mod normalize;
pub mod queue;
pub mod request;
pub mod store;
pub mod transport;

pub use request::{Coordinator, CoordinatorBuilder, RequestOptions};
