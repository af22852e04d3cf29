/// Failures of a single-file transfer.
///
/// Remote diagnostics keep the peer's message verbatim (minus line framing);
/// use [`Error::remote_message`] to get at it without the display prefix.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Starting the remote peer or wiring its stdio failed.
    #[error("transport failure: {0:#}")]
    Transport(#[source] anyhow::Error),
    /// The peer sent something this client does not understand, or a
    /// directive could not be encoded.
    #[error("protocol violation: {reason}")]
    ProtocolViolation {
        reason: String,
        #[source]
        source: Option<std::num::ParseIntError>,
    },
    #[error("remote warning: {0}")]
    RemoteWarning(String),
    #[error("remote error: {0}")]
    RemoteError(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The content stream was abandoned before the transfer completed.
    #[error("transfer cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn violation(reason: impl Into<String>) -> Self {
        Error::ProtocolViolation {
            reason: reason.into(),
            source: None,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>, source: std::num::ParseIntError) -> Self {
        Error::ProtocolViolation {
            reason: reason.into(),
            source: Some(source),
        }
    }

    /// The message supplied by the remote peer, if this is a remote diagnostic.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            Error::RemoteWarning(message) | Error::RemoteError(message) => Some(message),
            _ => None,
        }
    }

    /// Render this error for the download content stream.
    ///
    /// I/O failures keep their kind, everything else becomes `Other` (or
    /// `InvalidData` for protocol violations) carrying the display text.
    pub fn to_io_error(&self) -> std::io::Error {
        let kind = match self {
            Error::Io(error) => error.kind(),
            Error::ProtocolViolation { .. } => std::io::ErrorKind::InvalidData,
            Error::Cancelled => std::io::ErrorKind::Interrupted,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, format!("{self:#}"))
    }
}
