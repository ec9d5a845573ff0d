use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Connection or write failure against the mapping store.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Publish, subscribe or receive failure against the notification bus.
    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    /// A payload on `channel` that could not be decoded. Listeners skip it.
    #[error("malformed message on {channel}: {reason}")]
    MalformedMessage { channel: String, reason: String },

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("embedding model error: {0}")]
    Model(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Errors that end a subscription loop, as opposed to skipping one message.
    pub fn is_terminal_for_listener(&self) -> bool {
        !matches!(self, Error::MalformedMessage { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(err.to_string())
    }
}
