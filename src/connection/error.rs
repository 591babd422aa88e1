use thiserror::Error;

use crate::protocol::{ProtocolError, ServerError};

/// Transport- and handshake-level connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("connection closed by server")]
    Closed,
    #[error("server requires a password but none is configured")]
    PasswordRequired,
    #[error("unsupported authentication request: {0}")]
    UnsupportedAuthentication(i32),
    #[error("startup failed: {0}")]
    Startup(ServerError),
    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),
}
