//! rovelink console library
//!
//! Line-oriented operator console for the device link: parses operator
//! input into device commands and renders connection state and inbound
//! frames.

pub mod args;
pub mod console;
