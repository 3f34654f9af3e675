//! Network rules module
//!
//! This module manages the network ACL of Azure Storage accounts: rule
//! matching and mutation, the per-account lock that serializes
//! read-modify-write cycles, and the remote operations against Azure
//! Resource Manager.

pub mod lock;
pub mod manager;
pub mod models;
pub mod operations;
pub mod reconciler;

pub use lock::*;
pub use manager::*;
pub use models::*;
pub use operations::*;
pub use reconciler::*;
