use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket is already open")]
    AlreadyOpen,
    #[error("socket is closed")]
    Closed,
    #[error("frame too large: {got} bytes (max {max})")]
    FrameTooLarge { max: usize, got: usize },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl From<tokio_websockets::Error> for SocketError {
    fn from(err: tokio_websockets::Error) -> Self {
        SocketError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SocketError>;
