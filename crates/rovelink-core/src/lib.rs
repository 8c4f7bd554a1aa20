//! rovelink Core Library
//!
//! Shared functionality for rovelink components:
//! - Wire protocol for the device link (commands, custom envelopes, inbound frames)
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{Command, CustomMessage, Inbound, InboundMessage};
