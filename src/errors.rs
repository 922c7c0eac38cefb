use std::io;

use thiserror::Error;

/// Failure classes a request can hit once it is past routing.
///
/// `Download` and `ModelLoad` are fatal for the request (no automatic retry)
/// and surface as a 500 with a JSON body. `InvalidImage` is recovered at the
/// handler boundary and turned into a field-error 400.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("model download failed: {0}")]
    Download(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("not a decodable image: {0}")]
    InvalidImage(String),

    #[error("storage error: {0}")]
    Storage(#[from] io::Error),
}

impl From<reqwest::Error> for ServerError {
    fn from(e: reqwest::Error) -> Self {
        ServerError::Download(e.to_string())
    }
}
