use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The deadline passed before the call could complete. `transferred` counts
    /// the units already committed by a multi-chunk write; reads always report 0.
    #[error("resource temporarily unavailable ({transferred} transferred)")]
    TemporarilyUnavailable { transferred: usize },
    #[error("invalid queue capacity {0}: must be a non-zero power of two")]
    InvalidCapacity(usize),
    #[error("endpoint closed")]
    Closed,
}

impl Error {
    pub(crate) fn unavailable() -> Self {
        Error::TemporarilyUnavailable { transferred: 0 }
    }

    /// Units moved before the error, for partial writes.
    pub fn transferred(&self) -> usize {
        match self {
            Error::TemporarilyUnavailable { transferred } => *transferred,
            _ => 0,
        }
    }

    pub fn is_temporarily_unavailable(&self) -> bool {
        matches!(self, Error::TemporarilyUnavailable { .. })
    }
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        match value {
            Error::TemporarilyUnavailable { .. } => io::Error::from_raw_os_error(libc::EAGAIN),
            Error::InvalidCapacity(_) => io::Error::new(io::ErrorKind::InvalidInput, value),
            Error::Closed => io::Error::new(io::ErrorKind::BrokenPipe, value),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
