//! Configuration management module
//!
//! This module handles the tool configuration (config file plus environment
//! overrides) and the declarative network rules files consumed by `apply`.

pub mod rules;
pub mod settings;

pub use rules::*;
pub use settings::*;
