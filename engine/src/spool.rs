use std::fs::File as StdFile;
use std::io;
use std::path::Path;

use tempfile::{Builder, NamedTempFile};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// The spool files backing one message in transit.
///
/// `message` receives the content exactly as the client sent it (minus
/// dot-stuffing, with `\n` terminators). `rewritten` starts empty and
/// is offered to the filter as a replacement target; if the filter
/// writes to it, the rewritten content is replayed instead of the
/// original. Both files are removed on drop, whichever way the
/// session ends.
#[derive(Debug)]
pub(crate) struct SpoolPair {
    message: NamedTempFile,
    rewritten: NamedTempFile,
    writer: File,
    bytes_spooled: u64,
}

impl SpoolPair {
    /// Create a fresh pair of spool files in `dir`.
    pub(crate) fn create(dir: &Path) -> io::Result<Self> {
        let message = Builder::new().prefix("sp").tempfile_in(dir)?;
        let rewritten = Builder::new().prefix("sp").tempfile_in(dir)?;

        let writer = File::from_std(message.as_file().try_clone()?);

        Ok(Self {
            message,
            rewritten,
            writer,
            bytes_spooled: 0,
        })
    }

    /// Append content bytes to the message file.
    pub(crate) async fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.bytes_spooled += bytes.len() as u64;

        Ok(())
    }

    /// Flush buffered content out to the message file.
    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }

    pub(crate) fn message_path(&self) -> &Path {
        self.message.path()
    }

    pub(crate) fn rewritten_path(&self) -> &Path {
        self.rewritten.path()
    }

    /// Content bytes spooled so far.
    pub(crate) fn message_size(&self) -> u64 {
        self.bytes_spooled
    }

    /// The file to replay to the output server: the rewritten file if
    /// the filter put anything in it, the original message otherwise.
    pub(crate) fn replay_source(&self) -> io::Result<StdFile> {
        if self.rewritten.as_file().metadata()?.len() > 0 {
            return self.rewritten.reopen();
        }

        self.message.reopen()
    }
}
