//! Client for the Firebase Realtime Database REST and streaming API.
//!
//! - [`database`]: references, CRUD operations and event-stream subscriptions (async).
//! - [`blocking`]: the same operations for callers without an async runtime.
//! - [`logger`]: the named loggers used by the crate.

pub mod blocking;
pub mod database;
pub mod logger;

#[cfg(test)]
pub mod test_support;
