use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};

const LABEL_WIDTH: usize = 40;
const TERM_WIDTH: usize = 80;
const UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Wraps a byte source and reports how much has been read through it.
///
/// Reads pass through untouched; byte counts go over an unbounded channel to
/// a background task that repaints a single status line, so the transfer
/// never waits on the terminal. Dropping the reader closes the channel, which
/// is what tells the renderer to clear the line and stop.
pub struct ProgressReader<R> {
    inner: R,
    deltas: mpsc::UnboundedSender<u64>,
}

/// Join handle for the renderer behind a [`ProgressReader`].
pub struct ProgressHandle {
    renderer: JoinHandle<()>,
}

impl<R> ProgressReader<R> {
    /// Wraps `inner`, rendering progress against `total` bytes on stderr.
    /// A `total` of 0 means the size is unknown and raw counts are shown.
    pub fn new(label: &str, inner: R, total: u64) -> (Self, ProgressHandle) {
        Self::with_output(label, inner, total, std::io::stderr())
    }

    pub fn with_output<W>(label: &str, inner: R, total: u64, output: W) -> (Self, ProgressHandle)
    where
        W: Write + Send + 'static,
    {
        let (deltas, receiver) = mpsc::unbounded_channel();
        let label = label.chars().take(LABEL_WIDTH).collect();
        let renderer = tokio::spawn(render_loop(label, total, receiver, output));
        (Self { inner, deltas }, ProgressHandle { renderer })
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let filled = buf.filled().len();
        let result = Pin::new(&mut self.inner).poll_read(cx, buf);
        if result.is_ready() {
            // 0 on EOF and on errors; the renderer only cares about the sum.
            let _ = self.deltas.send((buf.filled().len() - filled) as u64);
        }
        result
    }
}

impl ProgressHandle {
    /// Waits for the renderer to drain outstanding counts and clear the
    /// status line. Call once the reader (or whatever consumed it) is gone.
    pub async fn finish(self) {
        let _ = self.renderer.await;
    }
}

async fn render_loop<W: Write>(
    label: String,
    total: u64,
    mut deltas: mpsc::UnboundedReceiver<u64>,
    mut output: W,
) {
    let mut read: u64 = 0;
    let mut ticker = interval(UPDATE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            delta = deltas.recv() => match delta {
                Some(n) => read += n,
                None => break,
            },
            _ = ticker.tick() => draw(&mut output, &label, read, total),
        }
    }

    clear(&mut output);
}

fn draw<W: Write>(output: &mut W, label: &str, read: u64, total: u64) {
    let line = if total > 0 {
        let percent = (read as f64 * 100.0 / total as f64).min(100.0);
        format!("\r{:<width$} {:>7.2}%", label, percent, width = LABEL_WIDTH)
    } else {
        format!("\r{:<width$} {:>7} B", label, read, width = LABEL_WIDTH)
    };
    let _ = output.write_all(line.as_bytes());
    let _ = output.flush();
}

fn clear<W: Write>(output: &mut W) {
    let _ = write!(output, "\r{:width$}\r", "", width = TERM_WIDTH - 2);
    let _ = output.flush();
}
