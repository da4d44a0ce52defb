//! Daemon error types.

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] ndnd_face::TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
