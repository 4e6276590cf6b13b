//! Ops daemon: HTTP operations API and the duty alert poller

pub mod api;
pub mod config;
