use thiserror::Error;

use crate::connection::ConnectionError;
use crate::event::{CodecError, EventError, RegistryError};
use crate::session::SessionError;
use crate::timestamp::TimestampError;
use crate::transport::TransportError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("Config error: {0}")]
    Config(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type SailResult<T> = Result<T, Error>;

impl Error {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Error::Config(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
