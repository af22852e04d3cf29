//! Control lines and status bytes
//!
//! Every checkpoint of the protocol is a single status byte: `0` to proceed,
//! `1` for a warning or `2` for an error, the latter two followed by a
//! newline-terminated message. The only directive understood is the file copy
//! line `C<mode> <size> <name>\n`.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

pub const STATUS_OK: u8 = 0;
pub const STATUS_WARNING: u8 = 1;
pub const STATUS_ERROR: u8 = 2;

/// Upper bound on any control line, directive or diagnostic.
pub const MAX_LINE_LEN: u64 = 64 * 1024;

/// Only permission bits travel in a copy directive.
pub const MODE_MASK: u32 = 0o7777;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Warning,
    Error,
}

impl Level {
    pub fn from_status(status: u8) -> Option<Self> {
        match status {
            STATUS_WARNING => Some(Level::Warning),
            STATUS_ERROR => Some(Level::Error),
            _ => None,
        }
    }

    pub fn status(self) -> u8 {
        match self {
            Level::Warning => STATUS_WARNING,
            Level::Error => STATUS_ERROR,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Warning => write!(f, "warning"),
            Level::Error => write!(f, "error"),
        }
    }
}

/// Announcement of a single regular file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directive {
    pub mode: u32,
    pub size: u64,
    pub name: String,
}

impl Directive {
    /// Parse a `C` line; the trailing newline is optional.
    pub fn parse(line: &[u8]) -> Result<Self, Error> {
        match line.first() {
            Some(b'C') => {}
            Some(first @ (b'D' | b'E' | b'T')) => {
                return Err(Error::violation(format!(
                    "unsupported directive '{}'",
                    char::from(*first)
                )));
            }
            Some(first) => {
                return Err(Error::violation(format!(
                    "invalid first byte; expected C but got {first:02x}"
                )));
            }
            None => return Err(Error::violation("empty directive line")),
        }
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = std::str::from_utf8(line)
            .map_err(|_| Error::violation("directive line is not valid UTF-8"))?;
        let fields: Vec<&str> = line.split(' ').collect();
        let [mode, size, name] = fields.as_slice() else {
            return Err(Error::violation(format!(
                "expected 3 fields in directive, got {}: {line:?}",
                fields.len()
            )));
        };
        let mode = u32::from_str_radix(&mode[1..], 8)
            .map_err(|err| Error::malformed(format!("invalid mode {:?}", &mode[1..]), err))?;
        if mode & !MODE_MASK != 0 {
            return Err(Error::violation(format!(
                "mode {mode:o} has bits outside of permissions"
            )));
        }
        let size = size
            .parse::<i64>()
            .map_err(|err| Error::malformed(format!("invalid size {size:?}"), err))?;
        let size = u64::try_from(size)
            .map_err(|_| Error::violation(format!("negative size {size}")))?;
        if name.is_empty() {
            return Err(Error::violation("empty file name in directive"));
        }
        Ok(Directive {
            mode,
            size,
            name: name.to_string(),
        })
    }

    /// Render the directive line, newline included.
    pub fn encode(&self) -> Result<String, Error> {
        if self.mode & !MODE_MASK != 0 {
            return Err(Error::violation(format!(
                "mode {:o} has bits outside of permissions",
                self.mode
            )));
        }
        if self.name.is_empty() {
            return Err(Error::violation("file name must not be empty"));
        }
        if self.name.contains('\n') {
            return Err(Error::violation(format!(
                "file name {:?} must not contain newlines",
                self.name
            )));
        }
        Ok(format!("C{:04o} {} {}\n", self.mode, self.size, self.name))
    }
}

/// A parsed protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Copy(Directive),
    Diagnostic { level: Level, message: String },
    Ack,
}

/// Read a line of at most [`MAX_LINE_LEN`] bytes, tolerating EOF in place of
/// the final newline. The newline is kept.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, Error> {
    let mut line = Vec::new();
    let mut limited = reader.take(MAX_LINE_LEN);
    limited.read_until(b'\n', &mut line).await?;
    if line.last() != Some(&b'\n') && line.len() as u64 == MAX_LINE_LEN {
        return Err(Error::violation(format!(
            "control line longer than {MAX_LINE_LEN} bytes"
        )));
    }
    Ok(line)
}

async fn read_diagnostic<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    level: Level,
) -> Result<Message, Error> {
    let line = read_line(reader).await?;
    let line = line.strip_suffix(b"\n").unwrap_or(&line);
    // invalid UTF-8 sequences become U+FFFD, everything else is kept as sent
    Ok(Message::Diagnostic {
        level,
        message: String::from_utf8_lossy(line).into_owned(),
    })
}

/// Read one status byte and the diagnostic line following a `1` or `2`.
pub async fn read_status<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Message, Error> {
    let status = reader.read_u8().await?;
    match Level::from_status(status) {
        Some(level) => read_diagnostic(reader, level).await,
        None if status == STATUS_OK => Ok(Message::Ack),
        None => Err(Error::violation(format!(
            "unexpected status byte {status:02x}"
        ))),
    }
}

/// Read what a source peer sends after the ready signal: either a diagnostic
/// or a copy directive line.
pub async fn read_directive<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Message, Error> {
    let first = match reader.fill_buf().await?.first() {
        Some(first) => *first,
        None => {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "remote closed the connection before sending a directive",
            )));
        }
    };
    if let Some(level) = Level::from_status(first) {
        reader.consume(1);
        return read_diagnostic(reader, level).await;
    }
    let line = read_line(reader).await?;
    Ok(Message::Copy(Directive::parse(&line)?))
}

/// Send a status byte and flush it to the peer.
pub async fn write_status<W: AsyncWrite + Unpin>(writer: &mut W, status: u8) -> Result<(), Error> {
    writer.write_u8(status).await?;
    writer.flush().await?;
    Ok(())
}

/// Send a directive line and flush it to the peer.
pub async fn write_directive<W: AsyncWrite + Unpin>(
    writer: &mut W,
    directive: &Directive,
) -> Result<(), Error> {
    let line = directive.encode()?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
