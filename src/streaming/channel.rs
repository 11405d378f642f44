//! Network output contract and a writer-backed implementation.
//!
//! The bridge submits one buffer at a time and learns the result later
//! through the returned [`WriteCompletion`].

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How a submitted write ended.
#[derive(Debug)]
pub enum WriteOutcome {
    Written,
    /// The peer went away or the channel was closed first.
    Cancelled,
    Failed(io::Error),
}

/// Resolves once the submitted bytes were handed to the peer, or not.
pub type WriteCompletion = BoxFuture<'static, WriteOutcome>;

/// A flow-controlled byte sink such as a client socket.
pub trait OutputChannel: Send + Sync {
    fn submit(&self, bytes: Bytes) -> WriteCompletion;
    fn is_open(&self) -> bool;
    /// Close after all previously submitted writes. Idempotent.
    fn close(&self);
}

// =============================================================================
// WriterChannel
// =============================================================================

enum Command {
    Write(Bytes, oneshot::Sender<WriteOutcome>),
    Close,
}

/// [`OutputChannel`] over any `AsyncWrite`, driven by its own task.
///
/// Writes are performed in submission order; each one is flushed before it
/// is reported as written.
pub struct WriterChannel {
    commands: mpsc::UnboundedSender<Command>,
    open: Arc<AtomicBool>,
}

impl WriterChannel {
    /// Spawn the writer task. Must be called from within a Tokio runtime.
    ///
    /// The task ends after [`close`](OutputChannel::close), after a failed
    /// write, or once the channel is dropped; it shuts the writer down on
    /// the way out.
    pub fn spawn<W>(writer: W) -> (Self, JoinHandle<io::Result<()>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_writer(writer, rx, Arc::clone(&open)));
        (Self { commands: tx, open }, task)
    }
}

impl OutputChannel for WriterChannel {
    fn submit(&self, bytes: Bytes) -> WriteCompletion {
        if !self.is_open() {
            return futures::future::ready(WriteOutcome::Cancelled).boxed();
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self.commands.send(Command::Write(bytes, done_tx)).is_err() {
            return futures::future::ready(WriteOutcome::Cancelled).boxed();
        }
        async move { done_rx.await.unwrap_or(WriteOutcome::Cancelled) }.boxed()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.commands.send(Command::Close);
        }
    }
}

async fn run_writer<W>(
    mut writer: W,
    mut commands: mpsc::UnboundedReceiver<Command>,
    open: Arc<AtomicBool>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = commands.recv().await {
        match command {
            Command::Write(bytes, done) => match write_chunk(&mut writer, &bytes).await {
                Ok(()) => {
                    let _ = done.send(WriteOutcome::Written);
                }
                Err(e) => {
                    tracing::debug!("output write failed: {}", e);
                    open.store(false, Ordering::Release);
                    let _ = done.send(classify(e));
                    break;
                }
            },
            Command::Close => break,
        }
    }

    open.store(false, Ordering::Release);
    commands.close();
    while let Ok(command) = commands.try_recv() {
        if let Command::Write(_, done) = command {
            let _ = done.send(WriteOutcome::Cancelled);
        }
    }
    writer.shutdown().await
}

async fn write_chunk<W>(writer: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// A vanished peer is a cancellation, anything else a failure.
fn classify(error: io::Error) -> WriteOutcome {
    match error.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => WriteOutcome::Cancelled,
        _ => WriteOutcome::Failed(error),
    }
}
