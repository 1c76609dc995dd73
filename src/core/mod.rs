//! Core abstractions and interfaces for reqflow
//!
//! This module provides the foundational traits, types, and utilities
//! shared by the queue, the coordinator and the hooks.

pub mod context;
pub mod error;
pub mod id;
pub mod registry;
pub mod signal;
pub mod traits;


// Re-export commonly used types
pub use context::RequestContext;
pub use error::{ErrorContext, ErrorKind, SyncError, SyncResult};
pub use id::{RequestId, RequestIdGenerator};
pub use registry::{CancellationRegistry, RegistryStats};
pub use signal::{abort_pair, AbortHandle, AbortSignal};
pub use traits::*;
