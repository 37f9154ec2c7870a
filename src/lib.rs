// ABOUTME: Library root for ptu - exposes the tunnel engine and its configuration.
// ABOUTME: The main binary is in main.rs.

pub mod config;
pub mod error;
pub mod output;
pub mod tunnel;
