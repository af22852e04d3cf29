//! Upload: drive a remote `scp -t` peer

use remote::{Channel, ScpCommand, Session};
use tokio::io::{
    AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};
use tracing::instrument;

use crate::control::{self, Directive, Level, Message};
use crate::error::Error;
use crate::file::File;

/// Upload `file` into `directory` on the remote host.
///
/// Exactly `file.size()` bytes are read from the file's content and sent to
/// the peer. Returns the warnings the peer reported along the way, in order.
/// A remote error aborts the upload and the warnings collected so far are
/// discarded.
#[instrument(skip(session, file), fields(name = file.name(), size = file.size()))]
pub async fn write_file<S, R>(
    session: &S,
    directory: &str,
    mut file: File<R>,
) -> Result<Vec<String>, Error>
where
    S: Session,
    R: AsyncRead + Unpin,
{
    // reject names the peer could misinterpret before starting anything remote
    let directive = file.directive();
    directive.encode()?;
    let mut channel = session
        .exec(&ScpCommand::Sink {
            directory: directory.to_string(),
        })
        .await
        .map_err(Error::Transport)?;
    let result = match channel.take_stdio() {
        Ok((writer, reader)) => {
            let mut writer = BufWriter::new(writer);
            let mut reader = BufReader::new(reader);
            upload(&mut writer, &mut reader, &directive, file.content_mut()).await
        }
        Err(error) => Err(Error::Transport(error)),
    };
    crate::close_channel(channel).await;
    match &result {
        Ok(warnings) => tracing::debug!("upload complete with {} warning(s)", warnings.len()),
        Err(error) => tracing::debug!("upload failed: {error:#}"),
    }
    result
}

async fn upload<W, B, R>(
    writer: &mut W,
    reader: &mut B,
    directive: &Directive,
    content: &mut R,
) -> Result<Vec<String>, Error>
where
    W: AsyncWrite + Unpin,
    B: AsyncBufRead + Unpin,
    R: AsyncRead + Unpin,
{
    let mut warnings = Vec::new();
    control::write_directive(writer, directive).await?;
    tracing::debug!("sent directive, waiting for the peer");
    checkpoint(reader, &mut warnings).await?;

    let sent = tokio::io::copy(&mut content.take(directive.size), writer).await?;
    if sent != directive.size {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("content ended after {sent} of {} bytes", directive.size),
        )));
    }
    writer.flush().await?;
    tracing::debug!("sent {} content bytes", sent);
    control::write_status(writer, control::STATUS_OK).await?;
    checkpoint(reader, &mut warnings).await?;
    Ok(warnings)
}

/// Evaluate one status byte from the peer. Warnings are collected, an error
/// is fatal.
async fn checkpoint<B: AsyncBufRead + Unpin>(
    reader: &mut B,
    warnings: &mut Vec<String>,
) -> Result<(), Error> {
    match control::read_status(reader).await? {
        Message::Ack => Ok(()),
        Message::Diagnostic {
            level: Level::Warning,
            message,
        } => {
            let message = message.trim().to_string();
            tracing::warn!("remote warning: {}", message);
            warnings.push(message);
            Ok(())
        }
        Message::Diagnostic {
            level: Level::Error,
            message,
        } => Err(Error::RemoteError(message.trim().to_string())),
        Message::Copy(_) => Err(Error::violation("unexpected directive from sink")),
    }
}
