//! Local child-process [`Session`](crate::Session)
//!
//! Runs the `scp` peer on this host without going through ssh. Used for
//! `localhost` transfers and handy for exercising the protocol end to end.

use anyhow::Context;
use tracing::instrument;

use crate::ScpCommand;

#[derive(Clone, Debug)]
pub struct LocalSession {
    program: std::ffi::OsString,
    close_timeout: std::time::Duration,
}

impl Default for LocalSession {
    fn default() -> Self {
        Self {
            program: "scp".into(),
            close_timeout: crate::DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl LocalSession {
    /// Use `program` instead of the `scp` found on `PATH`.
    pub fn with_program(program: impl Into<std::ffi::OsString>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn close_timeout(mut self, close_timeout: std::time::Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }
}

impl crate::Session for LocalSession {
    type Channel = LocalChannel;

    #[instrument(skip(self))]
    async fn exec(&self, command: &ScpCommand) -> anyhow::Result<LocalChannel> {
        tracing::debug!("spawning local command: {}", command);
        let child = tokio::process::Command::new(&self.program)
            .args(command.args())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn local command: {command}"))?;
        Ok(LocalChannel {
            child,
            close_timeout: self.close_timeout,
        })
    }
}

#[derive(Debug)]
pub struct LocalChannel {
    child: tokio::process::Child,
    close_timeout: std::time::Duration,
}

impl crate::Channel for LocalChannel {
    type Writer = tokio::process::ChildStdin;
    type Reader = tokio::process::ChildStdout;

    fn take_stdio(&mut self) -> anyhow::Result<(Self::Writer, Self::Reader)> {
        let stdin = self
            .child
            .stdin
            .take()
            .context("failed to get stdin for local command")?;
        let stdout = self
            .child
            .stdout
            .take()
            .context("failed to get stdout for local command")?;
        Ok((stdin, stdout))
    }

    async fn close(mut self) -> anyhow::Result<()> {
        drop(self.child.stdin.take());
        drop(self.child.stdout.take());
        match tokio::time::timeout(self.close_timeout, self.child.wait()).await {
            Ok(status) => {
                let status = status.context("failed to wait for local scp completion")?;
                if !status.success() {
                    tracing::debug!("local scp exited with {:?}", status.code());
                }
            }
            Err(_) => {
                tracing::warn!(
                    "local scp did not exit within {:?}, killing it",
                    self.close_timeout
                );
                self.child
                    .kill()
                    .await
                    .context("failed to kill local scp")?;
            }
        }
        Ok(())
    }
}
