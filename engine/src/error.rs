use std::io;

use thiserror::Error;

/// The main error for this crate encapsulating the different error cases.
#[derive(Debug, Error)]
pub enum Error {
    /// If IO breaks on either peer connection, this will return a
    /// [`Error::Io`], which is a simple [`std::io::Error`]. Check the
    /// underlying transport.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A spool file could not be created, written or read back.
    #[error("spool file error: {0}")]
    Spool(#[source] io::Error),
}

impl Error {
    /// Whether this error just means a peer went away.
    ///
    /// Sessions treat a reset connection like a regular disconnect
    /// instead of failing the whole session.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        let Self::Io(source) = self else {
            return false;
        };

        matches!(
            source.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::NotConnected
        )
    }
}
