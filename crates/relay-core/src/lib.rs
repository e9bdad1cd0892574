//! # relay-core
//!
//! Connection/broadcast subsystem for the Relay chat server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Message** - Immutable chat event and its JSON wire form
//! - **BroadcastGroup** - Single-owner actor serializing one channel's
//!   membership changes and message fan-out
//! - **Registry** - Lookup/creation point mapping channel ids to groups
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌────────────────┐
//! │  Connection │────▶│  Registry   │────▶│ BroadcastGroup │
//! └─────────────┘     └─────────────┘     └────────────────┘
//!        ▲                                        │
//!        └────────── bounded outbound queue ──────┘
//! ```
//!
//! Each connection registers with exactly one group for its lifetime. The
//! group fans every message out to each member's bounded queue with a
//! non-blocking send; a member whose queue is full is evicted so that a
//! slow consumer never stalls delivery to the rest.

pub mod group;
pub mod message;
pub mod registry;

pub use group::{BroadcastGroup, ConnectionId, Member, Outbound, OUTBOUND_QUEUE_CAPACITY};
pub use message::{Message, MAX_CONTENT_BYTES};
pub use registry::Registry;
