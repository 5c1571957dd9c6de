//! ## UCP
//!
//! Client side of the line-delimited JSON protocol spoken by the upstream node.
pub mod backoff;
pub mod client;
pub mod messages;
pub mod pending;

pub use client::{ConnectionState, UpstreamFeedClient, UpstreamHandle};
pub use pending::SubmitHandle;
