//! `streamctl-core` — shared foundation for the streamctl control plane.
//!
//! Holds the pieces every other crate needs: configuration loading
//! (TOML + env overrides), compact duration-string parsing, and the
//! core error type.

pub mod config;
pub mod duration;
pub mod error;

pub use config::StreamctlConfig;
pub use duration::parse_duration;
pub use error::{ConfigError, InvalidDuration};
