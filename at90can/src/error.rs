use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No transmit buffer became free within {rounds} polling rounds")]
    Timeout { rounds: u32 },

    #[error("Transmission was cancelled")]
    Cancelled,

    #[error("Payload of {length} bytes does not fit behind the message header")]
    PayloadTooLong { length: usize },

    #[error("Requested {length} payload bytes, but only {available} are staged")]
    StagingTooShort { length: usize, available: usize },

    #[error("Config Error: {0}")]
    ConfigError(#[from] toml::de::Error),

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}
