//! HTTP and WebSocket front end for the dispatch core.

pub mod app;
pub mod config;
pub mod handlers;
pub mod logging;
pub mod ws;
