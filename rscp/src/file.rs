use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use crate::control::{Directive, MODE_MASK};

/// A single regular file being transferred: metadata plus a content stream.
///
/// The size must be known up front since the receiving peer is told about it
/// before any content is sent. For uploads the caller provides the content;
/// for downloads it is a [`ContentStream`](crate::ContentStream) fed by the
/// background transfer task. `File` reads through to its content.
#[derive(Debug)]
pub struct File<R> {
    name: String,
    size: u64,
    mode: u32,
    content: R,
}

impl<R> File<R> {
    /// Only the permission bits of `mode` are kept.
    pub fn new(name: impl Into<String>, size: u64, mode: u32, content: R) -> Self {
        Self {
            name: name.into(),
            size,
            mode: mode & MODE_MASK,
            content,
        }
    }

    pub(crate) fn from_directive(directive: Directive, content: R) -> Self {
        Self::new(directive.name, directive.size, directive.mode, content)
    }

    /// Name of the file without any path component.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn permissions(&self) -> std::fs::Permissions {
        use std::os::unix::fs::PermissionsExt;
        std::fs::Permissions::from_mode(self.mode)
    }

    /// Always false, directories are not transferred.
    pub fn is_dir(&self) -> bool {
        false
    }

    /// Always `None`, timestamps are not transferred.
    pub fn modified(&self) -> Option<std::time::SystemTime> {
        None
    }

    pub fn directive(&self) -> Directive {
        Directive {
            mode: self.mode,
            size: self.size,
            name: self.name.clone(),
        }
    }

    pub fn content_mut(&mut self) -> &mut R {
        &mut self.content
    }

    pub fn into_content(self) -> R {
        self.content
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for File<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().content).poll_read(cx, buf)
    }
}
