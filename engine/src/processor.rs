//! The per-line state machine driving a [`Session`].
//!
//! Outside the content phase, client lines are classified, mined for
//! envelope attributes and relayed. A `DATA` command is answered by
//! the proxy itself and opens the spool; content lines are un-stuffed
//! and spooled until the terminating `.` runs the filter and decides
//! the message's fate.

use std::time::Duration;

use asynchronous_codec::FramedRead;
use bytes::{Buf, BufMut, BytesMut};
use futures::StreamExt;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, error, info};

use smtpsift_common::commands::ClientCommand;
use smtpsift_common::encoding::{Reply, Verb};
use smtpsift_common::Line;

use crate::codec::SmtpLineCodec;
use crate::filter::{run_filter, Verdict};
use crate::session::Session;
use crate::spool::SpoolPair;
use crate::Error;

/// How long the output server may sit without traffic during the
/// content phase before a NOOP keeps the connection alive.
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// What a processed client line did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineOutcome {
    /// Relayed to the output server.
    Forwarded,
    /// Written to the spool file.
    Spooled,
    /// A `DATA` command opened the content phase.
    EnteredData,
    /// The terminating `.` closed the content phase.
    LeftData,
}

impl<C, S> Session<'_, C, S>
where
    C: futures::AsyncRead + futures::AsyncWrite + Unpin + Send,
    S: futures::AsyncRead + futures::AsyncWrite + Unpin + Send,
{
    /// Process one framed client line.
    pub(crate) async fn process_line(&mut self, line: Line) -> Result<LineOutcome, Error> {
        if self.spool.is_some() {
            return self.data_line(line).await;
        }

        match ClientCommand::classify(&line) {
            ClientCommand::DataStart => return self.data_start().await,
            ClientCommand::XForward(forwarded) => {
                if let Some(addr) = forwarded.addr {
                    self.envelope.record_client_addr(addr);
                }
                if let Some(helo) = forwarded.helo {
                    self.envelope.record_helo(helo);
                }
            }
            ClientCommand::MailFrom(Some(sender)) => self.envelope.record_sender(sender),
            ClientCommand::RcptTo(Some(recipient)) => self.envelope.record_recipient(recipient),
            _ => {}
        }

        if let Err(e) = self.write_server(line.bytes).await {
            error!("Failed relaying to output server: {e}");
            let reply = Reply::new(421, "Service not available - output server write failed");
            let _ = self.write_client(reply).await;
            return Err(e);
        }

        Ok(LineOutcome::Forwarded)
    }

    /// A `DATA` command: open the spool and invite the content.
    ///
    /// The command is not relayed; the proxy answers the `354` itself
    /// and synthesizes its own `DATA` once the filter lets the message
    /// through.
    async fn data_start(&mut self) -> Result<LineOutcome, Error> {
        let spool = match SpoolPair::create(&self.config.spool_dir) {
            Ok(spool) => spool,
            Err(e) => {
                error!("Failed to create spool files: {e}");
                let reply = Reply::new(421, "Service not available - spool file creation error");
                let _ = self.write_client(reply).await;
                self.quit_server().await;
                return Err(Error::Spool(e));
            }
        };
        self.spool = Some(spool);

        self.write_client(Reply::new(354, "End data with <CR><LF>.<CR><LF>"))
            .await?;

        Ok(LineOutcome::EnteredData)
    }

    /// A content line: un-stuff, spool, keep the server awake.
    async fn data_line(&mut self, mut line: Line) -> Result<LineOutcome, Error> {
        if line.starts_fresh && line.first_byte() == Some(b'.') {
            // RFC 2821 section 4.5.2 transparency.
            line.bytes.advance(1);

            if matches!(line.first_byte(), Some(b'\r' | b'\n')) {
                return self.data_end().await;
            }
        }

        // Spool with bare \n terminators.
        if line.bytes.ends_with(b"\r\n") {
            line.bytes.truncate(line.bytes.len() - 2);
            line.bytes.put_u8(b'\n');
        }

        let Some(spool) = self.spool.as_mut() else {
            return Ok(LineOutcome::Spooled);
        };

        if let Err(e) = spool.append(&line.bytes).await {
            error!("Failed writing to spool file: {e}");
            let reply = Reply::new(421, "Service not available - spool file write failed");
            let _ = self.write_client(reply).await;
            self.quit_server().await;
            return Err(Error::Spool(e));
        }

        if self.last_server_write.elapsed() > KEEPALIVE_IDLE {
            self.write_server(Verb::Noop).await?;
            self.ignore_responses += 1;
            debug!("Sent a keepalive NOOP to the output server");
        }

        Ok(LineOutcome::Spooled)
    }

    /// The terminating `.`: run the filter and accept or reject.
    async fn data_end(&mut self) -> Result<LineOutcome, Error> {
        let Some(mut spool) = self.spool.take() else {
            return Ok(LineOutcome::LeftData);
        };

        if let Err(e) = spool.flush().await {
            error!("Failed flushing the spool file: {e}");
            let reply = Reply::new(421, "Service not available - spool file write failed");
            let _ = self.write_client(reply).await;
            self.quit_server().await;
            return Err(Error::Spool(e));
        }

        let size = spool.message_size();

        match run_filter(self.config, &spool, &self.envelope).await {
            Verdict::Rejected(reason) => {
                let reply = Reply::rejection(reason.as_deref());
                self.log_verdict("reject", size, &reply.to_string());

                self.write_client(reply).await?;
                self.reset_server().await?;
            }
            Verdict::Failed if self.config.reject_on_filter_failure => {
                self.log_verdict("reject", size, "filter failure");

                self.write_client(Reply::new(451, "Error running content filter"))
                    .await?;
                self.reset_server().await?;
            }
            Verdict::Accepted => {
                self.relay_spool(spool).await?;
                self.log_verdict("accept", size, "filter passed");
            }
            Verdict::Failed => {
                self.relay_spool(spool).await?;
                self.log_verdict("accept", size, "filter failure ignored");
            }
        }

        Ok(LineOutcome::LeftData)
    }

    /// Abort the server's pending transaction after a rejection. The
    /// server's answer is the proxy's to swallow.
    async fn reset_server(&mut self) -> Result<(), Error> {
        self.write_server(Verb::Rset).await?;
        self.ignore_responses += 1;

        Ok(())
    }

    /// Replay the filtered message to the output server, re-stuffed
    /// and with `\r\n` terminators.
    async fn relay_spool(&mut self, spool: SpoolPair) -> Result<(), Error> {
        let source = match spool.replay_source() {
            Ok(source) => source,
            Err(e) => {
                error!("Failed to open the spool file for replay: {e}");
                let _ = self.write_client(Reply::new(451, "Spool file read error")).await;
                self.quit_server().await;
                return Err(Error::Spool(e));
            }
        };

        self.write_server(Verb::Data).await?;
        self.ignore_responses += 1;

        let mut frames = FramedRead::new(
            tokio::fs::File::from_std(source).compat(),
            SmtpLineCodec::new(self.config.max_line_length),
        );

        while let Some(result) = frames.next().await {
            let mut line = match result {
                Ok(line) => line,
                Err(e) => {
                    error!("Failed reading the spool file: {e}");
                    let _ = self.write_client(Reply::new(451, "Spool file read error")).await;
                    self.quit_server().await;
                    return Err(match e {
                        Error::Io(source) => Error::Spool(source),
                        other => other,
                    });
                }
            };

            let mut out = BytesMut::with_capacity(line.bytes.len() + 3);

            if line.starts_fresh && line.first_byte() == Some(b'.') {
                out.put_u8(b'.');
            }

            if line.bytes.last() == Some(&b'\n') {
                line.bytes.truncate(line.bytes.len() - 1);
                if line.bytes.last() == Some(&b'\r') {
                    line.bytes.truncate(line.bytes.len() - 1);
                }
                out.put_slice(&line.bytes);
                out.put_slice(b"\r\n");
            } else {
                out.put_slice(&line.bytes);
            }

            if let Err(e) = self.write_server(out).await {
                error!("Failed replaying to output server: {e}");
                let _ = self.write_client(Reply::new(451, "Error writing to output server")).await;
                return Err(e);
            }
        }

        if let Err(e) = self.write_server(BytesMut::from(&b".\r\n"[..])).await {
            error!("Failed replaying to output server: {e}");
            let _ = self.write_client(Reply::new(451, "Error writing to output server")).await;
            return Err(e);
        }

        Ok(())
    }

    /// One summary line per message, whichever way it went.
    fn log_verdict(&self, outcome: &str, size: u64, detail: &str) {
        info!(
            host = self.envelope.client_addr().unwrap_or("???"),
            helo = self.envelope.helo().unwrap_or("???"),
            from = self.envelope.sender().unwrap_or("???"),
            to = self.envelope.recipient().unwrap_or("???"),
            size,
            "{outcome}: {detail}"
        );
    }
}
