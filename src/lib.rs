//! Roadbook gate - per-client rate limiting for the roadbook API
//!
//! This crate throttles clients before they reach the authentication and
//! write paths. Each client identity gets a lazily refilled token bucket held
//! in an in-memory registry that evicts idle clients without a background
//! task. An axum middleware turns denials into `429 Too Many Requests`.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
