use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the wire client, the exchange and the state store.
#[derive(Debug, Error)]
pub enum Error {
    /// Connect timeout, socket failure or protocol desynchronisation.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("the client is already connected")]
    AlreadyConnected,

    /// A command was issued while the client was not connected or was draining.
    #[error("connection closed")]
    ConnectionClosed,

    /// An outstanding request was rejected because the connection was closed.
    #[error("connection closing")]
    ConnectionClosing,

    /// The server answered with an error reply.
    #[error("error reply: {0}")]
    Reply(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not updated: {0}")]
    NotUpdated(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Raised by a consumer to request a controlled shutdown of the owning
    /// connection. Not a failure.
    #[error("terminate requested: {0}")]
    Terminate(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn terminate(reason: impl Into<String>) -> Self {
        Self::Terminate(reason.into())
    }

    pub fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate(_))
    }
}
