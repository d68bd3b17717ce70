//! # relay-server
//!
//! HTTP/WebSocket front end for the Relay chat server: configuration,
//! request handlers and Prometheus metrics. The `relay` binary is a thin
//! wrapper around [`handlers::run_server`].

pub mod config;
pub mod handlers;
pub mod metrics;
