//! # relay-server
//!
//! Real-time channel chat server: axum HTTP/WebSocket surface over the
//! `relay-core` broadcast subsystem, with JWT authentication, SQLite
//! persistence of users/channels/membership, rate limiting, and CORS.

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod ratelimit;
pub mod routes;
pub mod store;
