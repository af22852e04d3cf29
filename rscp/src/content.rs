//! In-process pipe between the download task and the caller
//!
//! The background task pushes chunks into a bounded channel, the caller pulls
//! them through [`ContentStream`]'s `AsyncRead` implementation. The stream
//! owns the task's cancellation token: dropping it (or calling
//! [`ContentStream::cancel`]) tells the task to stop and release the remote
//! peer.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

type Chunk = std::io::Result<Bytes>;

/// Create a pipe buffering up to `capacity` chunks.
pub(crate) fn pipe(capacity: usize, token: CancellationToken) -> (ContentSender, ContentStream) {
    let (sender, receiver) = tokio::sync::mpsc::channel(capacity.max(1));
    (
        ContentSender {
            sender,
            token: token.clone(),
        },
        ContentStream {
            receiver,
            chunk: Bytes::new(),
            token,
            task: None,
        },
    )
}

/// Write side, owned by the background task.
#[derive(Debug)]
pub(crate) struct ContentSender {
    sender: tokio::sync::mpsc::Sender<Chunk>,
    token: CancellationToken,
}

impl ContentSender {
    /// Deliver a chunk; fails with [`Error::Cancelled`] once the reader is gone.
    pub async fn send(&self, chunk: Bytes) -> Result<(), Error> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            sent = self.sender.send(Ok(chunk)) => sent.map_err(|_| Error::Cancelled),
        }
    }

    /// Close the pipe so that the reader's next read fails with `error`.
    pub async fn fail(self, error: &Error) {
        if matches!(error, Error::Cancelled) {
            return;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {}
            _ = self.sender.send(Err(error.to_io_error())) => {}
        }
    }
}

/// Read side of a download, handed to the caller inside a [`File`](crate::File).
///
/// Reads yield the file content and then EOF once the transfer has completed
/// and the remote peer was released. A failure during the transfer is
/// returned from `poll_read` as an I/O error; the typed error is available
/// from [`ContentStream::finish`].
#[derive(Debug)]
pub struct ContentStream {
    receiver: tokio::sync::mpsc::Receiver<Chunk>,
    chunk: Bytes,
    token: CancellationToken,
    task: Option<tokio::task::JoinHandle<Result<(), Error>>>,
}

impl ContentStream {
    pub(crate) fn attach(&mut self, task: tokio::task::JoinHandle<Result<(), Error>>) {
        self.task = Some(task);
    }

    /// Ask the background task to stop. Pending and future reads see EOF or
    /// the cancellation once the task has released the remote peer.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Discard unread content and wait for the background task to finish.
    ///
    /// Returns the outcome of the whole transfer, including the final
    /// acknowledgement and the release of the remote peer.
    pub async fn finish(mut self) -> Result<(), Error> {
        self.chunk.clear();
        while self.receiver.recv().await.is_some() {}
        match self.task.take() {
            Some(task) => task.await.map_err(|err| {
                Error::Transport(anyhow::anyhow!("download task failed: {err}"))
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for ContentStream {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl AsyncRead for ContentStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if !this.chunk.is_empty() {
                let n = buf.remaining().min(this.chunk.len());
                buf.put_slice(&this.chunk.split_to(n));
                return Poll::Ready(Ok(()));
            }
            match ready!(this.receiver.poll_recv(cx)) {
                Some(Ok(chunk)) => this.chunk = chunk,
                Some(Err(error)) => return Poll::Ready(Err(error)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}
