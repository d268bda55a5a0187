#![doc = include_str!("../Readme.md")]

mod codec;
mod config;
mod error;
mod filter;
mod processor;
mod session;
mod spool;

pub use config::Config;
pub use error::Error;

use futures::{AsyncRead, AsyncWrite};
use tracing::instrument;

use self::session::Session;

/// The entry point to proxy smtp connections through a content filter.
#[derive(Debug)]
pub struct Proxy {
    config: Config,
}

impl Proxy {
    /// Create a new proxy with the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Proxy a single smtp session between `client` and `server`.
    ///
    /// Runs until either side closes its connection. The server
    /// connection must be fresh: its greeting is relayed to the client
    /// like any other reply.
    ///
    /// # Errors
    /// Io problems on either stream and spool file problems end the
    /// session with an error. A peer simply disconnecting does not.
    #[instrument(skip_all)]
    pub async fn handle_connection<C, S>(&self, client: C, server: S) -> Result<(), Error>
    where
        C: AsyncRead + AsyncWrite + Unpin + Send,
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        Session::new(&self.config, client, server).run().await
    }
}
