//! Download: drive a remote `scp -qf` peer
//!
//! The handshake runs in the caller's task. Once the directive has been
//! acknowledged, a background task takes over the remote channel and streams
//! exactly `size` bytes into the [`ContentStream`] returned to the caller.

use bytes::Bytes;
use remote::{Channel, ScpCommand, Session};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::content::{self, ContentSender, ContentStream};
use crate::control::{self, Directive, Level, Message};
use crate::error::Error;
use crate::file::File;

/// Read a single file from the remote host.
///
/// Errors that occur before the content starts flowing are returned directly.
/// Errors during content reception surface through the returned file's
/// content stream (and from [`ContentStream::finish`]).
#[instrument(skip(session, settings))]
pub async fn read_file<S: Session>(
    session: &S,
    path: &str,
    settings: &crate::Settings,
) -> Result<File<ContentStream>, Error> {
    let mut channel = session
        .exec(&ScpCommand::Source {
            path: path.to_string(),
        })
        .await
        .map_err(Error::Transport)?;
    let (writer, reader) = match channel.take_stdio() {
        Ok(stdio) => stdio,
        Err(error) => {
            crate::close_channel(channel).await;
            return Err(Error::Transport(error));
        }
    };
    let mut writer = BufWriter::new(writer);
    let mut reader = BufReader::new(reader);
    let directive = match handshake(&mut writer, &mut reader).await {
        Ok(directive) => directive,
        Err(error) => {
            drop(writer);
            drop(reader);
            crate::close_channel(channel).await;
            return Err(error);
        }
    };
    tracing::debug!(
        "receiving {:?} ({} bytes, mode {:o})",
        directive.name,
        directive.size,
        directive.mode
    );
    let token = CancellationToken::new();
    let (sender, mut stream) = content::pipe(settings.pipe_capacity, token.clone());
    let transfer = Transfer {
        size: directive.size,
        chunk_size: settings.chunk_size.max(1),
        token,
    };
    let task = tokio::spawn(transfer.run(channel, writer, reader, sender));
    stream.attach(task);
    Ok(File::from_directive(directive, stream))
}

/// Ready signal, directive, acknowledgement.
async fn handshake<W, R>(writer: &mut W, reader: &mut R) -> Result<Directive, Error>
where
    W: AsyncWrite + Unpin,
    R: tokio::io::AsyncBufRead + Unpin,
{
    control::write_status(writer, control::STATUS_OK).await?;
    tracing::debug!("sent ready signal, waiting for directive");
    // a diagnostic here is fatal regardless of its level, no directive follows it
    let directive = match control::read_directive(reader).await? {
        Message::Copy(directive) => directive,
        Message::Diagnostic {
            level: Level::Warning,
            message,
        } => return Err(Error::RemoteWarning(message)),
        Message::Diagnostic {
            level: Level::Error,
            message,
        } => return Err(Error::RemoteError(message)),
        Message::Ack => return Err(Error::violation("expected a copy directive")),
    };
    control::write_status(writer, control::STATUS_OK).await?;
    Ok(directive)
}

#[derive(Debug)]
struct Transfer {
    size: u64,
    chunk_size: usize,
    token: CancellationToken,
}

impl Transfer {
    /// Body of the background task: owns the channel until it is closed.
    #[instrument(skip_all, fields(size = self.size))]
    async fn run<C, W, R>(
        self,
        channel: C,
        mut writer: BufWriter<W>,
        mut reader: BufReader<R>,
        sender: ContentSender,
    ) -> Result<(), Error>
    where
        C: Channel,
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        let result = self.stream(&mut writer, &mut reader, &sender).await;
        drop(writer);
        drop(reader);
        crate::close_channel(channel).await;
        match &result {
            Ok(()) => tracing::debug!("download complete"),
            Err(Error::Cancelled) => tracing::debug!("download cancelled by reader"),
            Err(error) => {
                tracing::debug!("download failed: {error:#}");
                sender.fail(error).await;
            }
        }
        result
    }

    async fn stream<W, R>(
        &self,
        writer: &mut BufWriter<W>,
        reader: &mut BufReader<R>,
        sender: &ContentSender,
    ) -> Result<(), Error>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        self.deliver(reader, sender).await?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                tracing::debug!("content delivered, reader is gone before the final ack");
                return Ok(());
            }
            acked = control::write_status(writer, control::STATUS_OK) => acked?,
        }
        // whatever follows (the peer's own status byte) is discarded until EOF
        let mut sink = tokio::io::sink();
        let drained = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                tracing::debug!("stopped draining, reader is gone");
                return Ok(());
            }
            drained = tokio::io::copy(reader, &mut sink) => drained?,
        };
        tracing::trace!("drained {} trailing bytes", drained);
        Ok(())
    }

    /// Forward exactly `size` bytes from the peer to the content pipe.
    async fn deliver<R>(&self, reader: &mut R, sender: &ContentSender) -> Result<(), Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut delivered = 0u64;
        while delivered < self.size {
            let want = (self.size - delivered).min(self.chunk_size as u64) as usize;
            let n = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(Error::Cancelled),
                n = reader.read(&mut buf[..want]) => n?,
            };
            if n == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!(
                        "remote closed the connection after {delivered} of {} bytes",
                        self.size
                    ),
                )));
            }
            sender.send(Bytes::copy_from_slice(&buf[..n])).await?;
            delivered += n as u64;
            tracing::trace!("delivered {}/{} bytes", delivered, self.size);
        }
        Ok(())
    }
}
