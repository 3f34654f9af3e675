//! stornet - Azure Storage network rules management
//!
//! Manages the network ACL (firewall rules) of Azure Storage accounts.
//! Every read-modify-write of an account's rule set runs under a per-account
//! lock, so concurrent changes to the same account never overwrite each other.

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod network_rules;
pub mod utils;

// Re-export commonly used types
pub use error::{Result, StornetError};
