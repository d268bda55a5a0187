/// Longest value kept for any envelope attribute, in bytes.
pub const MAX_ATTR_LEN: usize = 99;

/// Write-once record of the message envelope, fed to the content filter.
///
/// Each attribute keeps the first value recorded for it; later sightings
/// are dropped. A session records the first `MAIL FROM` / `RCPT TO` /
/// `XFORWARD` attributes it sees and the record is never reset, so a
/// multi-message session exposes the first message's envelope only.
#[derive(Debug, Default, Clone)]
pub struct Envelope {
    client_addr: Option<String>,
    helo: Option<String>,
    sender: Option<String>,
    recipient: Option<String>,
}

impl Envelope {
    /// Record the upstream client address, unless one is already known.
    pub fn record_client_addr(&mut self, addr: String) {
        self.client_addr.get_or_insert(addr);
    }

    /// Record the upstream HELO name, unless one is already known.
    pub fn record_helo(&mut self, helo: String) {
        self.helo.get_or_insert(helo);
    }

    /// Record the envelope sender, unless one is already known.
    pub fn record_sender(&mut self, sender: String) {
        self.sender.get_or_insert(sender);
    }

    /// Record the envelope recipient, unless one is already known.
    pub fn record_recipient(&mut self, recipient: String) {
        self.recipient.get_or_insert(recipient);
    }

    /// The upstream client address, if one was forwarded.
    #[must_use]
    pub fn client_addr(&self) -> Option<&str> {
        self.client_addr.as_deref()
    }

    /// The upstream HELO name, if one was forwarded.
    #[must_use]
    pub fn helo(&self) -> Option<&str> {
        self.helo.as_deref()
    }

    /// The envelope sender, if a `MAIL FROM` was seen.
    #[must_use]
    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    /// The envelope recipient, if a `RCPT TO` was seen.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }
}
