//! Remote process collaborator for the SCP client
//!
//! The protocol core never talks to SSH directly. It asks a [`Session`] to
//! start the remote `scp` peer described by a [`ScpCommand`] and then drives
//! the peer's standard input and output through the returned [`Channel`].
//!
//! Two sessions are provided: [`ssh::OpenSshSession`] runs the peer on a remote
//! host over a multiplexed OpenSSH connection, [`local::LocalSession`] runs it
//! as a local child process.

use tokio::io::{AsyncRead, AsyncWrite};

pub mod local;
pub mod ssh;

/// How long [`Channel::close`] waits for the peer to exit before giving up.
pub const DEFAULT_CLOSE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// The remote `scp` invocation for one single-file transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScpCommand {
    /// `scp -qf <path>`: the peer sends `path` to us.
    Source { path: String },
    /// `scp -t <directory>`: the peer receives a file into `directory`.
    Sink { directory: String },
}

impl ScpCommand {
    pub fn program(&self) -> &'static str {
        "scp"
    }

    /// Arguments passed to the peer, unescaped.
    pub fn args(&self) -> [&str; 2] {
        match self {
            ScpCommand::Source { path } => ["-qf", path.as_str()],
            ScpCommand::Sink { directory } => ["-t", directory.as_str()],
        }
    }
}

impl std::fmt::Display for ScpCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [flag, target] = self.args();
        write!(f, "{} {} {}", self.program(), flag, shell_escape(target))
    }
}

/// A running remote peer with its standard input and output.
pub trait Channel: Send + 'static {
    type Writer: AsyncWrite + Unpin + Send + 'static;
    type Reader: AsyncRead + Unpin + Send + 'static;

    /// Hand out the peer's stdin and stdout. Succeeds once per channel.
    fn take_stdio(&mut self) -> anyhow::Result<(Self::Writer, Self::Reader)>;

    /// Release the peer. Must be called on every exit path, after the stdio
    /// halves have been dropped.
    fn close(self) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// Something able to start remote `scp` peers.
///
/// Every call to [`Session::exec`] yields an independent channel; sessions
/// hold no per-transfer state.
pub trait Session: Send + Sync {
    type Channel: Channel;

    fn exec(
        &self,
        command: &ScpCommand,
    ) -> impl std::future::Future<Output = anyhow::Result<Self::Channel>> + Send;
}

/// Remote host coordinates, as given on the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshSession {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl SshSession {
    pub fn local() -> Self {
        Self {
            user: None,
            host: "localhost".to_string(),
            port: None,
        }
    }

    pub fn is_local(&self) -> bool {
        self.user.is_none() && self.port.is_none() && self.host == "localhost"
    }

    /// `ssh://` destination understood by the OpenSSH client.
    ///
    /// IPv6 literals are put back into brackets so the port stays separable.
    pub fn destination(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        match (self.user.as_deref(), self.port) {
            (Some(user), Some(port)) => format!("ssh://{user}@{host}:{port}"),
            (None, Some(port)) => format!("ssh://{host}:{port}"),
            (Some(user), None) => format!("ssh://{user}@{host}"),
            (None, None) => format!("ssh://{host}"),
        }
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ',' | ':' | '@' | '%')
}

/// Quote `value` for a POSIX shell.
///
/// Values made only of safe characters pass through untouched, anything else
/// is wrapped in single quotes with embedded quotes spliced as `'\''`.
pub fn shell_escape(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_shell_safe) {
        return value.to_string();
    }
    let mut escaped = String::with_capacity(value.len() + 2);
    escaped.push('\'');
    for c in value.chars() {
        if c == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(c);
        }
    }
    escaped.push('\'');
    escaped
}
