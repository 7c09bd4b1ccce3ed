//! Error types shared between [`crate::codec`] and [`crate::protocol`].

use std::{
    error::Error as StdError,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// An error encountered while talking to a single memcached connection, or
/// while encoding/decoding a value.
#[derive(Debug)]
pub enum Error {
    /// An error communicating over the wire. Always means the connection
    /// must be destroyed rather than returned to a pool.
    Io(std::io::Error),
    /// The server's reply did not match the expected grammar for the
    /// command that was sent.
    Protocol(ProtocolError),
    /// An error (de-)serializing a value into the tagged binary form.
    Codec(bincode::Error),
    /// The server replied `NOT_FOUND` to a retrieval, delete, incr or decr.
    NotFound,
    /// The server replied `NOT_STORED` to a set/add/replace.
    NotStored,
    /// No connection to the chosen server could be established.
    Unreachable,
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Self::Protocol(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Codec(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::Io(err) => write!(f, "IoError: {}", err),
            Error::Protocol(err) => write!(f, "ProtocolError: {}", err),
            Error::Codec(err) => write!(f, "CodecError: {}", err),
            Error::NotFound => write!(f, "NotFound"),
            Error::NotStored => write!(f, "NotStored"),
            Error::Unreachable => write!(f, "Unreachable"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Protocol(err) => Some(err),
            Error::Codec(err) => Some(err),
            Error::NotFound | Error::NotStored | Error::Unreachable => None,
        }
    }
}

/// The server's reply did not match the grammar §4.4 defines for the
/// command that produced it.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ProtocolError {
    /// A line could not be parsed as the expected reply shape, e.g. a
    /// `VALUE` line with too few fields.
    Malformed(String),
    /// The server returned a line indicating a server-side error
    /// (`ERROR`, `CLIENT_ERROR ...`, `SERVER_ERROR ...`).
    ServerError(String),
    /// An `incr`/`decr` reply was not a decimal integer.
    NonNumericReply(String),
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProtocolError::Malformed(line) => write!(f, "malformed reply: {:?}", line),
            ProtocolError::ServerError(line) => write!(f, "server error: {:?}", line),
            ProtocolError::NonNumericReply(line) => {
                write!(f, "expected a decimal counter reply, got: {:?}", line)
            }
        }
    }
}

impl StdError for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::{Error, ProtocolError};

    #[test]
    fn test_err_display() {
        assert_eq!(
            "ProtocolError: server error: \"CLIENT_ERROR bad command line\"",
            format!(
                "{}",
                Error::Protocol(ProtocolError::ServerError(
                    "CLIENT_ERROR bad command line".into()
                ))
            )
        );
        assert_eq!("NotFound", format!("{}", Error::NotFound));
        assert_eq!("NotStored", format!("{}", Error::NotStored));
        assert_eq!("Unreachable", format!("{}", Error::Unreachable));
    }
}
