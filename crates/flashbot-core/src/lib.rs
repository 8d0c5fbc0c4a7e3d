//! Core domain + application logic for the flashbot webhook relay.
//!
//! This crate is intentionally framework-agnostic. Telegram / Gemini / the
//! SSH tunnel live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod context;
pub mod dedup;
pub mod domain;
pub mod errors;
pub mod history;
pub mod lifecycle;
pub mod logging;
pub mod messaging;
pub mod model;
pub mod relay;
pub mod utils;

pub use errors::{Error, Result};
