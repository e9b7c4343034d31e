//! Error types for keyq.
//!
//! The queue itself never fails: an empty dequeue or an ignored confirm is
//! expressed through the return value. These errors cover the machinery
//! around it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("dispatcher is closed")]
    Closed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("scenario error: {0}")]
    Scenario(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
