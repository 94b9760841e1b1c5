//! Per-handle output thread that drains the PTY into an [`OutputStream`].
//!
//! PTY reads are blocking, so each handle gets its own dedicated OS thread.
//! The reader is owned by that thread directly (not behind any session
//! mutex), so a silent child never blocks writes, resizes or closes.

use std::io::{ErrorKind, Read};

use log::debug;
use tokio::sync::mpsc;

use crate::pty::PtyError;

const READ_BUF_SIZE: usize = 65536;

/// Raw bytes produced by a PTY child, in order.
///
/// The stream ends (yields `None`) once the child exits or the handle is
/// killed. It cannot be restarted.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl OutputStream {
    /// Wait for the next chunk of output.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Take a chunk if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }

    /// Blocking variant of [`recv`](OutputStream::recv) for non-async callers.
    ///
    /// Panics if called from within an async runtime, like
    /// `tokio::sync::mpsc::UnboundedReceiver::blocking_recv`.
    pub fn blocking_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.blocking_recv()
    }
}

/// Start draining `reader` on a thread named `pty-io-{label}`.
///
/// `on_exit` runs exactly once, on the I/O thread, after the reader reports
/// EOF or an error. If the returned stream is dropped the thread keeps
/// draining and discarding, so the child never stalls on a full PTY buffer.
pub fn start_output_pump<F>(
    label: &str,
    reader: Box<dyn Read + Send>,
    on_exit: F,
) -> Result<OutputStream, PtyError>
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let name = format!("pty-io-{label}");
    let thread_label = label.to_string();

    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            io_loop(&thread_label, reader, tx);
            on_exit();
        })
        .map_err(PtyError::Thread)?;

    Ok(OutputStream { rx })
}

fn io_loop(label: &str, mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            // EIO once the child side is gone.
            Err(_) => break,
        };
        total += n as u64;
        // A closed receiver only means nobody is watching anymore.
        let _ = tx.send(buf[..n].to_vec());
    }

    debug!("pty output for {label} ended after {total} bytes");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::{PtyCommand, PtyHandle};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    async fn collect_until(stream: &mut OutputStream, needle: &str) -> String {
        let mut output = Vec::new();
        let _ = timeout(Duration::from_secs(3), async {
            while let Some(chunk) = stream.recv().await {
                output.extend_from_slice(&chunk);
                if String::from_utf8_lossy(&output).contains(needle) {
                    break;
                }
            }
        })
        .await;
        String::from_utf8_lossy(&output).into_owned()
    }

    #[tokio::test]
    async fn test_pump_forwards_output() {
        let mut handle = PtyHandle::spawn(&PtyCommand::new("/bin/sh"), 80, 24).unwrap();
        let reader = handle.take_reader().unwrap();
        let mut stream = start_output_pump("test-forward", reader, || {}).unwrap();

        handle.write(b"echo PUMP_OK\n").unwrap();

        let text = collect_until(&mut stream, "PUMP_OK").await;
        assert!(text.contains("PUMP_OK"), "got: {text}");
    }

    #[tokio::test]
    async fn test_on_exit_runs_when_child_exits() {
        let mut handle = PtyHandle::spawn(&PtyCommand::new("/bin/sh"), 80, 24).unwrap();
        let reader = handle.take_reader().unwrap();
        let (done_tx, done_rx) = oneshot::channel();
        let mut stream = start_output_pump("test-exit", reader, move || {
            let _ = done_tx.send(());
        })
        .unwrap();

        handle.write(b"exit 0\n").unwrap();

        let finished = timeout(Duration::from_secs(5), done_rx).await;
        assert!(finished.is_ok(), "on_exit did not run after child exit");

        // Drain whatever was buffered; the stream must then end.
        let ended = timeout(Duration::from_secs(1), async {
            while stream.recv().await.is_some() {}
        })
        .await;
        assert!(ended.is_ok());
    }

    #[tokio::test]
    async fn test_on_exit_runs_after_kill() {
        let mut handle = PtyHandle::spawn(&PtyCommand::new("/bin/sh"), 80, 24).unwrap();
        let reader = handle.take_reader().unwrap();
        let (done_tx, done_rx) = oneshot::channel();
        let _stream = start_output_pump("test-kill", reader, move || {
            let _ = done_tx.send(());
        })
        .unwrap();

        handle.kill();

        let finished = timeout(Duration::from_secs(5), done_rx).await;
        assert!(finished.is_ok(), "on_exit did not run after kill");
    }

    #[tokio::test]
    async fn test_dropped_stream_keeps_draining() {
        let mut handle = PtyHandle::spawn(&PtyCommand::new("/bin/sh"), 80, 24).unwrap();
        let reader = handle.take_reader().unwrap();
        let (done_tx, done_rx) = oneshot::channel();
        let stream = start_output_pump("test-drop", reader, move || {
            let _ = done_tx.send(());
        })
        .unwrap();
        drop(stream);

        handle.write(b"echo still-running; exit 0\n").unwrap();
        assert!(timeout(Duration::from_secs(5), done_rx).await.is_ok());
    }
}
