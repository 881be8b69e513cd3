use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("profile store has not signaled readiness")]
    NotReady,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("profile store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed profile snapshot: {0}")]
    Snapshot(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// Status codes returned across the C ABI.
pub mod code {
    pub const SUCCESS: i32 = 0;
    pub const NOT_READY: i32 = -1;
    pub const INVALID_ARGUMENT: i32 = -2;
    pub const STORE_UNAVAILABLE: i32 = -3;
    pub const IO_ERROR: i32 = -4;
    pub const SNAPSHOT_ERROR: i32 = -5;
}

impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Error::NotReady => code::NOT_READY,
            Error::InvalidArgument(_) => code::INVALID_ARGUMENT,
            Error::StoreUnavailable(_) => code::STORE_UNAVAILABLE,
            Error::Io(_) => code::IO_ERROR,
            Error::Snapshot(_) => code::SNAPSHOT_ERROR,
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Snapshot(e.to_string())
    }
}
