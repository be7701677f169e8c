use thiserror::Error;

/// Crate-wide error type for the gateway runtime spine.
///
/// Mirrors the teacher's `SessionError`/`DbError` convention: one
/// `thiserror` enum per concern, propagated with `?` and only ever turned
/// fatal at the process entrypoint.
#[derive(Debug, Error)]
pub enum GwError {
    #[error("call timed out waiting for echo {echo}")]
    CallTimeout { echo: String },

    #[error("session is shutting down")]
    SessionClosing,

    #[error("websocket send failed: {0}")]
    Send(String),

    #[error("wire decode error: {0}")]
    Decode(#[from] gw_protocol::DecodeError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("private messages may not contain an `at` segment")]
    PrivateMessageWithAt,

    #[error("response payload had an unexpected shape: {0}")]
    UnexpectedResponseShape(String),

    #[error("broadcast graph contains a cycle: {0}")]
    BroadcastCycle(String),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}
