use std::time::Instant;

use asynchronous_codec::Framed;
use futures::stream::Fuse;
use futures::{select, AsyncRead, AsyncWrite, SinkExt, StreamExt};
use tracing::{debug, error};

use smtpsift_common::encoding::{Reply, Verb, WireMessage};
use smtpsift_common::{Envelope, Line};

use crate::codec::SmtpLineCodec;
use crate::spool::SpoolPair;
use crate::{Config, Error};

/// One proxied smtp session between a client and the output server.
///
/// The session owns both framed connections and the per-session state:
/// the write-once envelope, the spool of the message currently in the
/// content phase, and the count of server replies that answer commands
/// the proxy itself synthesized and must not reach the client.
pub(crate) struct Session<'c, C, S> {
    pub(crate) config: &'c Config,
    pub(crate) client: Fuse<Framed<C, SmtpLineCodec>>,
    pub(crate) server: Fuse<Framed<S, SmtpLineCodec>>,
    pub(crate) envelope: Envelope,
    pub(crate) spool: Option<SpoolPair>,
    pub(crate) ignore_responses: u32,
    pub(crate) last_server_write: Instant,
}

/// What the multiplexer saw next.
enum Event {
    Client(Option<Result<Line, Error>>),
    Server(Option<Result<Line, Error>>),
}

impl<'c, C, S> Session<'c, C, S>
where
    C: AsyncRead + AsyncWrite + Unpin + Send,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(config: &'c Config, client: C, server: S) -> Self {
        let client = Framed::new(client, SmtpLineCodec::new(config.max_line_length)).fuse();
        let server = Framed::new(server, SmtpLineCodec::new(config.max_line_length)).fuse();

        Self {
            config,
            client,
            server,
            envelope: Envelope::default(),
            spool: None,
            ignore_responses: 0,
            last_server_write: Instant::now(),
        }
    }

    /// Relay the session until one side is done.
    pub(crate) async fn run(&mut self) -> Result<(), Error> {
        loop {
            let event = {
                let client = &mut self.client;
                let server = &mut self.server;

                select! {
                    line = client.next() => Event::Client(line),
                    line = server.next() => Event::Server(line),
                }
            };

            match event {
                Event::Client(Some(Ok(line))) => {
                    self.process_line(line).await?;
                }
                Event::Client(Some(Err(e))) if e.is_disconnect() => {
                    debug!("Client connection reset: {e}");
                    self.quit_server().await;
                    break;
                }
                Event::Client(Some(Err(e))) => {
                    error!("Failed reading from client: {e}");
                    self.quit_server().await;
                    return Err(e);
                }
                Event::Client(None) => {
                    debug!("Client closed the connection");
                    self.quit_server().await;
                    break;
                }
                Event::Server(Some(Ok(line))) => {
                    self.relay_server_line(line).await?;
                }
                Event::Server(Some(Err(e))) if e.is_disconnect() => {
                    debug!("Server connection reset: {e}");
                    return Ok(());
                }
                Event::Server(Some(Err(e))) => {
                    error!("Failed reading from output server: {e}");
                    let reply = Reply::new(421, "Service not available - error reading from output server");
                    let _ = self.write_client(reply).await;
                    return Err(e);
                }
                Event::Server(None) => {
                    debug!("Server closed the connection");
                    return Ok(());
                }
            }
        }

        // The client is gone and our QUIT is on its way. Wait out the
        // server's remaining replies so nothing lingers half-closed.
        while let Some(result) = self.server.next().await {
            match result {
                Ok(line) => {
                    self.try_swallow(&line);
                }
                Err(e) if e.is_disconnect() => break,
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Pass a server line on to the client, unless it answers a
    /// command the proxy synthesized.
    async fn relay_server_line(&mut self, line: Line) -> Result<(), Error> {
        if self.try_swallow(&line) {
            return Ok(());
        }

        self.write_client(line.bytes).await
    }

    /// Swallow a reply to a synthesized command. Returns whether the
    /// line was consumed.
    pub(crate) fn try_swallow(&mut self, line: &Line) -> bool {
        let is_status = line
            .first_byte()
            .is_some_and(|b| (b'2'..=b'5').contains(&b));

        if self.ignore_responses > 0 && line.starts_fresh && is_status {
            self.ignore_responses -= 1;
            debug!("Swallowed a reply to a synthesized command");
            return true;
        }

        false
    }

    /// Best-effort QUIT towards the output server.
    pub(crate) async fn quit_server(&mut self) {
        if self.server.is_done() {
            return;
        }

        if let Err(e) = self.write_server(Verb::Quit).await {
            debug!("Failed sending QUIT to output server: {e}");
        }
    }

    pub(crate) async fn write_server(
        &mut self,
        message: impl Into<WireMessage>,
    ) -> Result<(), Error> {
        let message = message.into();
        self.server.send(&message).await?;
        self.last_server_write = Instant::now();

        Ok(())
    }

    pub(crate) async fn write_client(
        &mut self,
        message: impl Into<WireMessage>,
    ) -> Result<(), Error> {
        if self.client.is_done() {
            // Nobody left to tell.
            return Ok(());
        }

        let message = message.into();
        self.client.send(&message).await?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;
    use pretty_assertions::assert_eq;
    use tokio_util::compat::TokioAsyncReadCompatExt;

    use super::*;

    fn status_line(bytes: &[u8], starts_fresh: bool) -> Line {
        Line::new(BytesMut::from(bytes), starts_fresh)
    }

    #[tokio::test]
    async fn swallows_as_many_replies_as_synthesized() {
        let config = Config::new("true");
        let (client, _client_peer) = tokio::io::duplex(64);
        let (server, _server_peer) = tokio::io::duplex(64);

        let mut session = Session::new(&config, client.compat(), server.compat());
        session.ignore_responses = 2;

        assert!(session.try_swallow(&status_line(b"250 Ok\r\n", true)));
        assert!(session.try_swallow(&status_line(b"550 No\r\n", true)));
        assert!(!session.try_swallow(&status_line(b"250 Ok\r\n", true)));
        assert_eq!(session.ignore_responses, 0);
    }

    #[tokio::test]
    async fn swallows_only_fresh_status_lines() {
        let config = Config::new("true");
        let (client, _client_peer) = tokio::io::duplex(64);
        let (server, _server_peer) = tokio::io::duplex(64);

        let mut session = Session::new(&config, client.compat(), server.compat());
        session.ignore_responses = 1;

        assert!(!session.try_swallow(&status_line(b"250 Ok\r\n", false)));
        assert!(!session.try_swallow(&status_line(b"650 odd\r\n", true)));
        assert_eq!(session.ignore_responses, 1);
    }
}
