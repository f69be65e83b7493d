//! Core domain + application logic for the Telegram channel exporter.
//!
//! This crate is intentionally framework-agnostic. Telegram and the language-model
//! backend live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod entities;
pub mod errors;
pub mod ledger;
pub mod logging;
pub mod ports;
pub mod processor;
pub mod retry;
pub mod sanitize;
pub mod tagging;
pub mod throttled;
pub mod walker;

pub use errors::{Error, Result};
