//! # Firebase Realtime Database REST client
//!
//! This module talks to the Realtime Database through its REST dialect: every
//! [`Reference`] renders to `<address>/.json?<params>` and maps reads and writes onto
//! GET, PUT, PATCH, POST and DELETE. Live changes are observed through the
//! event-stream endpoint of the same URL.
//!
//! ## Features
//!
//! - Address and path normalization, children that keep an independent copy of the
//!   query parameters
//! - Query flags: `auth`, `shallow`, `format=export`, `orderBy`, `startAt`, `endAt`,
//!   `limitToFirst`, `limitToLast`
//! - Redirects followed with the original headers preserved, bounded to 30 hops
//! - One error kind per failure surface (timeout, network, redirect limit, rejected,
//!   decode, stream terminated)
//! - One streaming session per reference, with buffered per-listener delivery
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use firebase_rtdb_rest::database::{EventType, Reference};
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut root = Reference::new("demo-project.firebaseio.com")?;
//!     root.set_auth("<database secret or id token>");
//!
//!     let messages = root.child("messages");
//!     let pushed = messages.push(&json!({ "text": "hello" })).await?;
//!     println!("stored under {:?}", pushed.key());
//!
//!     let latest: Value = messages.order_by_key().limit_to_last(10).value().await?;
//!     println!("latest: {latest}");
//!
//!     let changes = messages.listen(EventType::ChildAdded);
//!     messages.start_stream().await?;
//!     while let Some(event) = changes.recv().await {
//!         let event = event?;
//!         println!("{} {}", event.event_type, event.path);
//!     }
//!     Ok(())
//! }
//! ```

mod address;
mod api;
mod constants;
pub mod error;
mod executor;
mod query;
mod realtime;
mod settings;
pub mod transport;

#[doc(inline)]
pub use api::Reference;

#[doc(inline)]
pub use constants::{DEFAULT_REDIRECT_LIMIT, DEFAULT_TIMEOUT};

#[doc(inline)]
pub use error::{DatabaseError, DatabaseErrorCode, DatabaseResult};

#[doc(inline)]
pub use query::QueryParams;

#[doc(inline)]
pub use realtime::{ChangeEvent, EventFilter, EventType, Listener, ListenerId, StreamState};

#[doc(inline)]
pub use settings::{DatabaseSettings, RedirectPolicy};
