// murmur-relay library entry point.

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod runtime;
pub mod ws;
