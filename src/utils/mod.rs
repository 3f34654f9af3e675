//! Utility functions module
//!
//! This module contains retry logic, HTTP client setup with network error
//! classification, and table formatting.

pub mod format;
pub mod network;
pub mod retry;

pub use format::*;
pub use network::*;
pub use retry::*;
