//! Client for the legacy single-file SCP protocol
//!
//! `rscp` drives a remote `scp` program over its standard input and output,
//! in either of its two roles:
//!
//! - **source** (`scp -qf <path>`): the peer sends one file, see [`read_file`]
//! - **sink** (`scp -t <directory>`): the peer receives one file, see [`write_file`]
//!
//! Starting the peer is delegated to a [`remote::Session`]: an OpenSSH
//! connection for real remote hosts or a local child process for `localhost`.
//!
//! # Download
//!
//! [`read_file`] performs the handshake and returns as soon as the remote file
//! is announced. Content then flows through a background task into the
//! [`ContentStream`] inside the returned [`File`]. Dropping the stream (or
//! calling [`ContentStream::cancel`]) stops the task and releases the peer;
//! [`ContentStream::finish`] waits for the outcome of the whole transfer.
//!
//! # Upload
//!
//! [`write_file`] sends the directive and the content, checking the peer's
//! status at both checkpoints. Remote warnings are collected and returned,
//! a remote error aborts the transfer.
//!
//! # Limitations
//!
//! One regular file per transfer. No directories, no timestamps, no
//! recursion. File names with spaces can be uploaded but not downloaded.

pub mod content;
pub mod control;
pub mod error;
pub mod file;
pub mod path;
pub mod sink;
pub mod source;

pub use content::ContentStream;
pub use error::Error;
pub use file::File;
pub use sink::write_file;
pub use source::read_file;

/// Default upper bound on a single read from the remote peer.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default number of chunks buffered between the download task and the reader.
pub const DEFAULT_PIPE_CAPACITY: usize = 16;

/// Tuning for downloads
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Largest chunk read from the peer and handed to the content stream
    pub chunk_size: usize,
    /// Chunks buffered before the download task waits for the reader
    pub pipe_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than 0".to_string());
        }
        if self.pipe_capacity == 0 {
            return Err("pipe_capacity must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Release the peer, logging rather than propagating a failure to do so.
async fn close_channel<C: remote::Channel>(channel: C) {
    if let Err(error) = channel.close().await {
        tracing::warn!("failed to close remote channel: {error:#}");
    }
}
