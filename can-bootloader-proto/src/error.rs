use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Identifier out of range: {0:#x}")]
    InvalidIdentifier(u32),

    #[error("Frame too long: {0} bytes")]
    FrameTooLong(usize),

    #[error("Invalid message subject {0:#x}")]
    InvalidSubject(u8),

    #[error("Invalid message format: {0}")]
    InvalidFormat(&'static str),

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}
