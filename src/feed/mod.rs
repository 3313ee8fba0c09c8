//! Market data feed on top of the hub connection
//!
//! - `aliases` / `decode` - payload pipeline: base64, raw deflate, JSON, key remap
//! - `subscription` - what the caller wants, replayed on every connect
//! - `auth` - private feed credentials and challenge signing
//! - `client` - the public [`FeedClient`]

pub mod aliases;
pub mod auth;
pub mod client;
pub mod decode;
pub mod events;
pub mod subscription;

pub use auth::{AuthStage, Credentials};
pub use client::FeedClient;
pub use decode::{decode_payload, decode_value, DecodeError};
pub use events::{ClientEvent, FeedEvent, FeedKind, TypedFeedEvent};
pub use subscription::{QueryMode, QueryTarget, SubscriptionIntent};
