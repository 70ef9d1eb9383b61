use thiserror::Error;

/// Coarse error classes the UI switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    NotFound,
    Network,
    Server,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("{0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("realtime channel error: {0}")]
    Channel(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Unauthenticated => ErrorKind::Unauthenticated,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Network(_) | ServiceError::Channel(_) => ErrorKind::Network,
            ServiceError::Server { .. } | ServiceError::Decode(_) => ErrorKind::Server,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ServiceError::Decode(e.to_string())
        } else {
            ServiceError::Network(e.to_string())
        }
    }
}
