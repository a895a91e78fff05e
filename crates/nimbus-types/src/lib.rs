//! Shared domain types for the Nimbus forecast player.

pub mod catalog;
pub mod config;
pub mod events;
pub mod frame;
pub mod state;

mod errors;

pub use errors::{NimbusError, Result};
