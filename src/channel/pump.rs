// src/channel/pump.rs

//! Background readers for a worker's stdout and stderr.
//!
//! The stdout pump routes upstream frames into the channel's slots and logs
//! everything else; it finishes when the worker closes stdout (normally on
//! exit), which is what [`Channel::drain`](super::Channel::drain) waits for.

use std::borrow::Cow;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::capsule::FailureCapsule;
use crate::types::Options;

use super::wire::{StdoutLine, Upstream, classify_stdout};

/// Coordinator-side ends of the upstream slots, written by the pump.
pub(crate) struct Slots {
    pub contribution: mpsc::Sender<Options>,
    pub ready: watch::Sender<bool>,
    pub failure: Arc<Mutex<Option<FailureCapsule>>>,
}

pub(crate) fn spawn_stdout_pump<R>(worker: String, stdout: R, slots: Slots) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(worker = %worker, error = %e, "failed reading worker stdout");
                    break;
                }
            }
            let line = decode_line(&buf);

            match classify_stdout(&line) {
                StdoutLine::Output(text) => {
                    debug!(worker = %worker, "stdout: {}", text);
                }
                StdoutLine::Frame { output, frame } => {
                    if let Some(text) = output {
                        debug!(worker = %worker, "stdout: {}", text);
                    }
                    match frame {
                        Ok(frame) => route(&worker, frame, &slots),
                        Err(e) => warn!(worker = %worker, error = %e, "dropping corrupt frame"),
                    }
                }
            }
        }

        debug!(worker = %worker, "worker stdout closed");
    })
}

fn route(worker: &str, frame: Upstream, slots: &Slots) {
    match frame {
        Upstream::Contribution { options } => {
            debug!(worker, keys = options.len(), "received contribution");
            if slots.contribution.try_send(options).is_err() {
                warn!(worker, "duplicate contribution ignored");
            }
        }
        Upstream::Ready => {
            debug!(worker, "worker signalled readiness");
            slots.ready.send_replace(true);
        }
        Upstream::Failure { capsule } => {
            debug!(worker, kind = capsule.kind(), "worker reported a failure");
            match slots.failure.lock() {
                Ok(mut slot) if slot.is_none() => *slot = Some(capsule),
                Ok(_) => warn!(worker, "second failure capsule ignored"),
                Err(_) => warn!(worker, "failure slot poisoned; capsule dropped"),
            }
        }
    }
}

/// Forward a worker's stderr to the log at debug level.
///
/// Keeps reading until EOF so the worker never writes into a closed pipe.
pub(crate) fn spawn_stderr_logger<R>(worker: String, stderr: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => debug!(worker = %worker, "stderr: {}", decode_line(&buf)),
                Err(e) => {
                    debug!(worker = %worker, error = %e, "failed reading worker stderr");
                    break;
                }
            }
        }
    })
}

/// Lossy UTF-8 view of one raw line, without its line ending.
fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::wire::encode_upstream;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn frames_are_routed_and_output_is_skipped() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (contribution_tx, mut contribution_rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = watch::channel(false);
        let failure = Arc::new(Mutex::new(None));

        let pump = spawn_stdout_pump(
            "w".into(),
            rx,
            Slots {
                contribution: contribution_tx,
                ready: ready_tx,
                failure: Arc::clone(&failure),
            },
        );

        let options = json!({ "a": 1 }).as_object().cloned().unwrap();
        let capsule = FailureCapsule::new("panic", "late", Vec::new());

        tx.write_all(b"hello from the worker\n").await.unwrap();
        for frame in [
            Upstream::Contribution {
                options: options.clone(),
            },
            Upstream::Ready,
            Upstream::Failure {
                capsule: capsule.clone(),
            },
        ] {
            tx.write_all(encode_upstream(&frame).unwrap().as_bytes())
                .await
                .unwrap();
        }
        drop(tx);

        pump.await.unwrap();

        assert_eq!(contribution_rx.recv().await, Some(options));
        assert_eq!(contribution_rx.recv().await, None);
        assert!(*ready_rx.borrow());
        assert_eq!(failure.lock().unwrap().clone(), Some(capsule));
    }

    #[tokio::test]
    async fn invalid_utf8_output_does_not_stop_the_pump() {
        let (mut tx, rx) = tokio::io::duplex(4096);
        let (contribution_tx, _contribution_rx) = mpsc::channel(1);
        let (ready_tx, ready_rx) = watch::channel(false);

        let pump = spawn_stdout_pump(
            "w".into(),
            rx,
            Slots {
                contribution: contribution_tx,
                ready: ready_tx,
                failure: Arc::new(Mutex::new(None)),
            },
        );

        tx.write_all(b"binary \xff\xfe output\n").await.unwrap();
        tx.write_all(b"\xff\n").await.unwrap();
        tx.write_all(encode_upstream(&Upstream::Ready).unwrap().as_bytes())
            .await
            .unwrap();
        drop(tx);

        pump.await.unwrap();
        assert!(*ready_rx.borrow());
    }

    #[tokio::test]
    async fn stderr_logger_reads_past_invalid_utf8_until_eof() {
        let (mut tx, rx) = tokio::io::duplex(64);
        let logger = spawn_stderr_logger("w".into(), rx);

        // Far more than the pipe buffer: only completes if the logger keeps
        // reading after the bad line.
        let write = async {
            tx.write_all(b"\xff\xfe not utf8\n").await?;
            tx.write_all(&vec![b'x'; 16 * 1024]).await?;
            tx.write_all(b"\n").await
        };
        tokio::time::timeout(std::time::Duration::from_secs(5), write)
            .await
            .expect("stderr logger stopped reading")
            .unwrap();
        drop(tx);

        logger.await.unwrap();
    }

    #[test]
    fn decode_line_strips_endings_and_replaces_bad_bytes() {
        assert_eq!(decode_line(b"plain\r\n"), "plain");
        assert_eq!(decode_line(b"a\xffb\n"), "a\u{fffd}b");
        assert_eq!(decode_line(b"no newline"), "no newline");
    }
}
