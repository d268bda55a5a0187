use std::process::Stdio;

use tempfile::Builder;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error};

use smtpsift_common::encoding::{clamp, MAX_REPLY_TEXT};
use smtpsift_common::Envelope;

use crate::spool::SpoolPair;
use crate::Config;

/// The outcome of a content filter run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Exit status 0: relay the message.
    Accepted,
    /// Exit status 1: reject the message, with the last non-empty
    /// stderr line as the reason, if the filter wrote one.
    Rejected(Option<String>),
    /// Anything else: spawn error, other exit status, signal, timeout.
    Failed,
}

/// Run the configured filter command over a spooled message.
///
/// The command runs via `/bin/sh -c` with the spooled message on
/// `EMAIL`, the rewrite target on `OUTFILE` and the captured envelope
/// on `REMOTEIP`, `HELO`, `SENDER` and `RECIPIENT`. A filter still
/// running after the configured timeout is killed.
///
/// This never errors; every internal problem is logged and counted as
/// [`Verdict::Failed`] so the session can apply its failure policy.
pub(crate) async fn run_filter(config: &Config, spool: &SpoolPair, envelope: &Envelope) -> Verdict {
    let stderr = match Builder::new().prefix("spe").tempfile_in(&config.spool_dir) {
        Ok(stderr) => stderr,
        Err(e) => {
            error!("Failed to create filter stderr file: {e}");
            return Verdict::Failed;
        }
    };

    let stderr_handle = match stderr.as_file().try_clone() {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to clone filter stderr handle: {e}");
            return Verdict::Failed;
        }
    };

    let mut child = match Command::new("/bin/sh")
        .arg("-c")
        .arg(&config.filter_command)
        .env("EMAIL", spool.message_path())
        .env("OUTFILE", spool.rewritten_path())
        .env("REMOTEIP", envelope.client_addr().unwrap_or(""))
        .env("HELO", envelope.helo().unwrap_or(""))
        .env("SENDER", envelope.sender().unwrap_or(""))
        .env("RECIPIENT", envelope.recipient().unwrap_or(""))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(stderr_handle))
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to spawn filter command: {e}");
            return Verdict::Failed;
        }
    };

    let status = match timeout(config.filter_timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            error!("Failed waiting for filter command: {e}");
            return Verdict::Failed;
        }
        Err(_elapsed) => {
            error!(
                "Filter command still running after {:?}, killing it",
                config.filter_timeout
            );
            if let Err(e) = child.start_kill() {
                error!("Failed to kill filter command: {e}");
            }
            // Reap it; kill_on_drop is only the backstop.
            let _ = child.wait().await;
            return Verdict::Failed;
        }
    };

    debug!("Filter command finished: {status}");

    match status.code() {
        Some(0) => Verdict::Accepted,
        Some(1) => Verdict::Rejected(last_stderr_line(stderr.path()).await),
        _ => Verdict::Failed,
    }
}

/// The last non-empty line the filter wrote to stderr, clamped to
/// reply-text length.
async fn last_stderr_line(path: &std::path::Path) -> Option<String> {
    let output = match tokio::fs::read(path).await {
        Ok(output) => output,
        Err(e) => {
            error!("Failed to read filter stderr file: {e}");
            return None;
        }
    };

    let output = String::from_utf8_lossy(&output);

    let line = output.lines().rev().find(|line| !line.trim().is_empty())?;

    let mut reason = line.trim_end().to_string();
    clamp(&mut reason, MAX_REPLY_TEXT);

    Some(reason)
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Config,
        spool: SpoolPair,
    }

    fn fixture(command: &str) -> Fixture {
        let dir = tempfile::tempdir().expect("no tempdir");

        let mut config = Config::new(command);
        config.spool_dir = dir.path().to_path_buf();

        let spool = SpoolPair::create(dir.path()).expect("no spool pair");

        Fixture {
            _dir: dir,
            config,
            spool,
        }
    }

    #[tokio::test]
    async fn a_clean_exit_accepts() {
        let f = fixture("true");

        let verdict = run_filter(&f.config, &f.spool, &Envelope::default()).await;

        assert_eq!(verdict, Verdict::Accepted);
    }

    #[tokio::test]
    async fn exit_one_rejects_with_the_last_stderr_line() {
        let f = fixture("echo first >&2; echo Spam detected >&2; echo >&2; exit 1");

        let verdict = run_filter(&f.config, &f.spool, &Envelope::default()).await;

        assert_eq!(verdict, Verdict::Rejected(Some("Spam detected".to_string())));
    }

    #[tokio::test]
    async fn exit_one_without_stderr_rejects_without_a_reason() {
        let f = fixture("exit 1");

        let verdict = run_filter(&f.config, &f.spool, &Envelope::default()).await;

        assert_eq!(verdict, Verdict::Rejected(None));
    }

    #[tokio::test]
    async fn other_exit_statuses_fail() {
        let f = fixture("exit 3");

        let verdict = run_filter(&f.config, &f.spool, &Envelope::default()).await;

        assert_eq!(verdict, Verdict::Failed);
    }

    #[tokio::test]
    async fn a_killed_filter_fails() {
        let f = fixture("kill -KILL $$");

        let verdict = run_filter(&f.config, &f.spool, &Envelope::default()).await;

        assert_eq!(verdict, Verdict::Failed);
    }

    #[tokio::test]
    async fn a_hanging_filter_is_killed_after_the_timeout() {
        let mut f = fixture("sleep 30");
        f.config.filter_timeout = Duration::from_millis(200);

        let started = std::time::Instant::now();
        let verdict = run_filter(&f.config, &f.spool, &Envelope::default()).await;

        assert_eq!(verdict, Verdict::Failed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn the_envelope_reaches_the_filter() {
        let f = fixture(r#"printf '%s|%s|%s|%s' "$REMOTEIP" "$HELO" "$SENDER" "$RECIPIENT" > "$OUTFILE"; exit 0"#);

        let mut envelope = Envelope::default();
        envelope.record_client_addr("192.0.2.7".into());
        envelope.record_helo("mx.example".into());
        envelope.record_sender("alice@example.com".into());
        envelope.record_recipient("bob@example.net".into());

        let verdict = run_filter(&f.config, &f.spool, &envelope).await;
        assert_eq!(verdict, Verdict::Accepted);

        let written = std::fs::read_to_string(f.spool.rewritten_path()).expect("read failed");
        assert_eq!(written, "192.0.2.7|mx.example|alice@example.com|bob@example.net");
    }

    #[tokio::test]
    async fn the_spooled_message_reaches_the_filter() {
        let mut f = fixture(r#"cat "$EMAIL" > "$OUTFILE""#);

        f.spool.append(b"hello\n").await.expect("append failed");
        f.spool.flush().await.expect("flush failed");

        let verdict = run_filter(&f.config, &f.spool, &Envelope::default()).await;
        assert_eq!(verdict, Verdict::Accepted);

        let written = std::fs::read_to_string(f.spool.rewritten_path()).expect("read failed");
        assert_eq!(written, "hello\n");
    }
}
