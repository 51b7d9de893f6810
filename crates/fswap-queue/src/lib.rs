//! Client for the remote task queue API.
//!
//! Tasks are leased by polling; progress and final state are pushed back over
//! the same JSON API, which also hands out pre-signed upload URLs.

pub mod client;
pub mod error;

pub use client::{ApiConfig, HttpTaskApi, TaskApi};
pub use error::{QueueError, QueueResult};
