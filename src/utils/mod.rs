//! Daemon configuration and the shared error taxonomy.

pub mod config;
pub mod errors;

pub use config::*;
pub use errors::*;
