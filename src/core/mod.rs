//! Core types: errors, configuration, execution context, output paths.

pub mod config;
pub mod context;
pub mod errors;
pub mod paths;
