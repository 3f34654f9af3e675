//! Authentication module for Azure services
//!
//! This module provides bearer tokens for Azure Resource Manager using
//! DefaultAzureCredential.

pub mod provider;

pub use provider::*;
