use thiserror::Error;

/// Configuration errors, raised at configure time and never during event
/// handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors surfaced by the reporter lifecycle.
#[derive(Debug, Error)]
pub enum ReporterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The configured address could not be bound on first acquire.
    #[error("Failed to bind metrics listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The listener thread or runtime could not be started.
    #[error("Failed to start metrics listener: {0}")]
    Listener(std::io::Error),

    #[error("Reporter is not configured")]
    NotConfigured,

    #[error("Reporter is already running")]
    AlreadyRunning,

    #[error("Reporter is closed")]
    Closed,
}
