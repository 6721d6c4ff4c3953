use thiserror::Error;

/// Configuration could not be loaded or parsed.
#[derive(Debug, Error)]
#[error("Configuration error: {0}")]
pub struct ConfigError(pub String);

/// A compact duration string (`30m`, `72h`, `3d`, …) failed to parse.
#[derive(Debug, Error)]
#[error("Invalid duration: {0}")]
pub struct InvalidDuration(pub String);
