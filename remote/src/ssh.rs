//! OpenSSH backed [`Session`](crate::Session)
//!
//! Connections go through the system `ssh` client's control master, so the
//! user's ssh config, agent and keys are honored and every [`ScpCommand`]
//! becomes one more session on the same master connection.

use anyhow::Context;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::instrument;

use crate::ScpCommand;

/// Host key policy applied when connecting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Only connect to hosts already present in `known_hosts`.
    #[default]
    Strict,
    /// Record unknown host keys, refuse changed ones.
    Add,
    /// Accept anything.
    Accept,
}

impl From<HostKeyPolicy> for openssh::KnownHosts {
    fn from(policy: HostKeyPolicy) -> Self {
        match policy {
            HostKeyPolicy::Strict => openssh::KnownHosts::Strict,
            HostKeyPolicy::Add => openssh::KnownHosts::Add,
            HostKeyPolicy::Accept => openssh::KnownHosts::Accept,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Settings {
    pub host_key_policy: HostKeyPolicy,
    pub close_timeout: std::time::Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host_key_policy: HostKeyPolicy::default(),
            close_timeout: crate::DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenSshSession {
    session: Arc<openssh::Session>,
    close_timeout: std::time::Duration,
}

impl OpenSshSession {
    #[instrument]
    pub async fn connect(target: &crate::SshSession, settings: &Settings) -> anyhow::Result<Self> {
        let destination = target.destination();
        tracing::debug!("Connecting to SSH destination: {}", destination);
        let session = openssh::Session::connect(&destination, settings.host_key_policy.into())
            .await
            .with_context(|| format!("Failed to establish SSH connection to {destination}"))?;
        Ok(Self {
            session: Arc::new(session),
            close_timeout: settings.close_timeout,
        })
    }
}

impl crate::Session for OpenSshSession {
    type Channel = OpenSshChannel;

    async fn exec(&self, command: &ScpCommand) -> anyhow::Result<OpenSshChannel> {
        let [flag, target] = command.args();
        tracing::debug!("spawning remote command: {}", command);
        let child = self
            .session
            .clone()
            .arc_command(command.program())
            .arg(flag)
            .raw_arg(crate::shell_escape(target))
            .stdin(openssh::Stdio::piped())
            .stdout(openssh::Stdio::piped())
            .stderr(openssh::Stdio::piped())
            .spawn()
            .await
            .with_context(|| format!("Failed to spawn remote command: {command}"))?;
        Ok(OpenSshChannel {
            child,
            close_timeout: self.close_timeout,
        })
    }
}

#[derive(Debug)]
pub struct OpenSshChannel {
    child: openssh::Child<Arc<openssh::Session>>,
    close_timeout: std::time::Duration,
}

impl crate::Channel for OpenSshChannel {
    type Writer = openssh::ChildStdin;
    type Reader = openssh::ChildStdout;

    fn take_stdio(&mut self) -> anyhow::Result<(Self::Writer, Self::Reader)> {
        let stdin = self
            .child
            .stdin()
            .take()
            .context("failed to get stdin for remote command")?;
        let stdout = self
            .child
            .stdout()
            .take()
            .context("failed to get stdout for remote command")?;
        Ok((stdin, stdout))
    }

    async fn close(mut self) -> anyhow::Result<()> {
        // close our end of stdin first so the peer sees EOF
        drop(self.child.stdin().take());
        drop(self.child.stdout().take());
        let stderr = self.child.stderr().take();
        let stderr_fut = async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf).await;
            }
            buf
        };
        let child = self.child;
        let wait = async move { tokio::join!(stderr_fut, child.wait()) };
        match tokio::time::timeout(self.close_timeout, wait).await {
            Ok((stderr_data, status)) => {
                let status = status.context("failed to wait for remote scp completion")?;
                if !status.success() {
                    tracing::debug!(
                        "remote scp exited with {:?}, stderr: {}",
                        status.code(),
                        String::from_utf8_lossy(&stderr_data).trim()
                    );
                }
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    "remote scp did not exit within {:?}, dropping the channel",
                    self.close_timeout
                );
                Ok(())
            }
        }
    }
}
