//! Command-line interface
//!
//! Thin wrappers that drive the client core from the terminal.

pub mod commands;
