//! Core of the link monitor: identifier normalization, deep-link matching,
//! the append-only link store and the event pipeline tying them together.
//!
//! This crate is framework-agnostic. The chat network lives behind the ports
//! in [`ports`], implemented in adapter crates.

pub mod bootstrap;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod matcher;
pub mod normalize;
pub mod pipeline;
pub mod ports;
pub mod store;

pub use errors::{Error, Result};
