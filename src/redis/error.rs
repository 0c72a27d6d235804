use thiserror::Error;

/// Errors surfaced at the boundaries of the RESP codec, option parser, and
/// RDB reader. Handler-level glue code wraps these in `anyhow::Error` the
/// same way the rest of the connection loop does.
#[derive(Debug, Error)]
pub enum RedisError {
    #[error("[redis - error] wire format error: {0}")]
    Wire(String),

    #[error("[redis - error] i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[redis - error] {0}")]
    Semantic(String),

    #[error("[redis - error] option error: {0}")]
    Option(String),

    #[error("[redis - error] rdb error: {0}")]
    Rdb(String),
}

pub type RedisResult<T> = Result<T, RedisError>;
