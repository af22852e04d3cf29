//! In-process scp peer for driving the client without ssh.
//!
//! [`FakeSession`] hands out channels backed by `tokio::io::duplex` pipes. The
//! other ends are served by a spawned task playing the scripted [`Peer`] role,
//! and everything the client sends, every command it asks for and every
//! channel it closes is recorded in the session's [`Journal`].
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use remote::ScpCommand;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio_util::sync::CancellationToken;

/// Small enough that a few chunks fill it up and the peer blocks.
const PIPE_BUFFER: usize = 256;

/// What the peer answers at an upload checkpoint.
#[derive(Clone, Debug)]
pub enum Reply {
    Ok,
    Warn(String),
    Error(String),
}

impl Reply {
    pub fn warn(message: &str) -> Self {
        Reply::Warn(message.to_string())
    }

    pub fn error(message: &str) -> Self {
        Reply::Error(message.to_string())
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Reply::Ok => vec![0],
            Reply::Warn(message) => [&[1u8][..], message.as_bytes(), b"\n"].concat(),
            Reply::Error(message) => [&[2u8][..], message.as_bytes(), b"\n"].concat(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFile {
    pub mode: u32,
    pub content: Vec<u8>,
}

/// Files kept by a [`Peer::Store`], keyed by full path.
#[derive(Clone, Debug, Default)]
pub struct Store(Arc<Mutex<HashMap<String, StoredFile>>>);

impl Store {
    pub fn insert(&self, path: &str, mode: u32, content: &[u8]) {
        self.0.lock().unwrap().insert(
            path.to_string(),
            StoredFile {
                mode,
                content: content.to_vec(),
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<StoredFile> {
        self.0.lock().unwrap().get(path).cloned()
    }
}

#[derive(Clone, Debug)]
pub enum Peer {
    /// `scp -qf`: waits for the ready byte, sends `header`; if that was a
    /// directive, waits for the acknowledgement and sends `body` verbatim.
    Source { header: Vec<u8>, body: Vec<u8> },
    /// `scp -t`: reads the directive line and answers `first`; unless that
    /// was an error, reads the content plus end marker and answers `second`.
    Sink { first: Reply, second: Reply },
    /// `scp -qf` that sends everything right after the ready byte and then
    /// stops reading its stdin until the channel is closed. Its stdin only
    /// buffers a single byte.
    Stalled(Vec<u8>),
    /// Both roles against an in-memory file store.
    Store(Store),
    /// `exec` itself fails.
    Unreachable,
}

impl Peer {
    /// A well behaved source sending `content` followed by its status byte.
    pub fn source(name: &str, mode: u32, content: &[u8]) -> Self {
        Peer::Source {
            header: format!("C{:04o} {} {}\n", mode, content.len(), name).into_bytes(),
            body: [content, &[0u8][..]].concat(),
        }
    }

    /// A source announcing `size` bytes but sending only `body`.
    pub fn truncated_source(name: &str, size: u64, body: &[u8]) -> Self {
        Peer::Source {
            header: format!("C0644 {size} {name}\n").into_bytes(),
            body: body.to_vec(),
        }
    }

    /// A source answering the ready byte with a diagnostic line.
    pub fn failing_source(status: u8, message: &str) -> Self {
        Peer::Source {
            header: [&[status][..], message.as_bytes(), b"\n"].concat(),
            body: Vec::new(),
        }
    }

    /// A stalled source announcing and sending `content` in one go.
    pub fn stalled_source(name: &str, mode: u32, content: &[u8]) -> Self {
        Peer::Stalled(
            [
                format!("C{:04o} {} {}\n", mode, content.len(), name).as_bytes(),
                content,
                &[0u8][..],
            ]
            .concat(),
        )
    }

    pub fn sink(first: Reply, second: Reply) -> Self {
        Peer::Sink { first, second }
    }
}

#[derive(Debug, Default)]
struct Entries {
    commands: Vec<ScpCommand>,
    received: Vec<u8>,
    closed: usize,
}

/// Record of everything that happened on a [`FakeSession`].
#[derive(Clone, Debug, Default)]
pub struct Journal(Arc<Mutex<Entries>>);

impl Journal {
    pub fn commands(&self) -> Vec<ScpCommand> {
        self.0.lock().unwrap().commands.clone()
    }

    /// Every byte the peer read from the client, in order.
    pub fn received(&self) -> Vec<u8> {
        self.0.lock().unwrap().received.clone()
    }

    pub fn closed(&self) -> usize {
        self.0.lock().unwrap().closed
    }

    /// Wait up to a few seconds for `count` channels to be closed.
    pub async fn wait_closed(&self, count: usize) -> bool {
        for _ in 0..500 {
            if self.closed() >= count {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        false
    }

    fn record(&self, bytes: &[u8]) {
        self.0.lock().unwrap().received.extend_from_slice(bytes);
    }
}

#[derive(Clone, Debug)]
pub struct FakeSession {
    peer: Peer,
    journal: Journal,
}

impl FakeSession {
    pub fn new(peer: Peer) -> Self {
        Self {
            peer,
            journal: Journal::default(),
        }
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }
}

impl remote::Session for FakeSession {
    type Channel = FakeChannel;

    async fn exec(&self, command: &ScpCommand) -> anyhow::Result<FakeChannel> {
        self.journal
            .0
            .lock()
            .unwrap()
            .commands
            .push(command.clone());
        if let Peer::Unreachable = self.peer {
            return Err(anyhow::anyhow!("ssh: connect to host: Connection refused"));
        }
        let stdin_buffer = match self.peer {
            Peer::Stalled(_) => 1,
            _ => PIPE_BUFFER,
        };
        let (client_writer, peer_reader) = tokio::io::duplex(stdin_buffer);
        let (peer_writer, client_reader) = tokio::io::duplex(PIPE_BUFFER);
        let hangup = CancellationToken::new();
        let task = tokio::spawn(serve(
            self.peer.clone(),
            command.clone(),
            BufReader::new(peer_reader),
            peer_writer,
            self.journal.clone(),
            hangup.clone(),
        ));
        Ok(FakeChannel {
            stdio: Some((client_writer, client_reader)),
            peer: task,
            hangup,
            journal: self.journal.clone(),
        })
    }
}

#[derive(Debug)]
pub struct FakeChannel {
    stdio: Option<(DuplexStream, DuplexStream)>,
    peer: tokio::task::JoinHandle<()>,
    hangup: CancellationToken,
    journal: Journal,
}

impl remote::Channel for FakeChannel {
    type Writer = DuplexStream;
    type Reader = DuplexStream;

    fn take_stdio(&mut self) -> anyhow::Result<(DuplexStream, DuplexStream)> {
        self.stdio
            .take()
            .ok_or_else(|| anyhow::anyhow!("stdio already taken"))
    }

    async fn close(self) -> anyhow::Result<()> {
        drop(self.stdio);
        self.hangup.cancel();
        let finished = tokio::time::timeout(std::time::Duration::from_secs(5), self.peer).await;
        self.journal.0.lock().unwrap().closed += 1;
        match finished {
            Ok(_) => Ok(()),
            Err(_) => Err(anyhow::anyhow!("fake peer did not exit")),
        }
    }
}

async fn serve(
    peer: Peer,
    command: ScpCommand,
    reader: BufReader<DuplexStream>,
    writer: DuplexStream,
    journal: Journal,
    hangup: CancellationToken,
) {
    // the client hanging up mid-conversation is a normal way for a peer to end
    let _ = match (peer, command) {
        (Peer::Source { header, body }, ScpCommand::Source { .. }) => {
            serve_source(reader, writer, &journal, &header, &body).await
        }
        (Peer::Sink { first, second }, ScpCommand::Sink { .. }) => {
            serve_sink(reader, writer, &journal, &first, &second)
                .await
                .map(|_| ())
        }
        (Peer::Stalled(output), ScpCommand::Source { .. }) => {
            serve_stalled(reader, writer, &journal, &output, hangup).await
        }
        (Peer::Store(store), ScpCommand::Source { path }) => {
            let (header, body) = match store.get(&path) {
                Some(file) => {
                    let name = path.rsplit('/').next().unwrap_or(&path);
                    (
                        format!("C{:04o} {} {}\n", file.mode, file.content.len(), name)
                            .into_bytes(),
                        [&file.content[..], &[0u8][..]].concat(),
                    )
                }
                None => (
                    format!("\x01scp: {path}: No such file or directory\n").into_bytes(),
                    Vec::new(),
                ),
            };
            serve_source(reader, writer, &journal, &header, &body).await
        }
        (Peer::Store(store), ScpCommand::Sink { directory }) => {
            match serve_sink(reader, writer, &journal, &Reply::Ok, &Reply::Ok).await {
                Ok(Some((directive, content))) => {
                    store.insert(
                        &format!("{}/{}", directory.trim_end_matches('/'), directive.name),
                        directive.mode,
                        &content,
                    );
                    Ok(())
                }
                Ok(None) => Ok(()),
                Err(error) => Err(error),
            }
        }
        (peer, command) => Err(std::io::Error::other(format!(
            "{peer:?} cannot serve {command}"
        ))),
    };
}

async fn read_byte(reader: &mut BufReader<DuplexStream>, journal: &Journal) -> std::io::Result<u8> {
    let byte = reader.read_u8().await?;
    journal.record(&[byte]);
    Ok(byte)
}

async fn read_rest(mut reader: BufReader<DuplexStream>, journal: &Journal) -> std::io::Result<()> {
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).await?;
    journal.record(&rest);
    Ok(())
}

async fn serve_source(
    mut reader: BufReader<DuplexStream>,
    mut writer: DuplexStream,
    journal: &Journal,
    header: &[u8],
    body: &[u8],
) -> std::io::Result<()> {
    read_byte(&mut reader, journal).await?;
    writer.write_all(header).await?;
    if header.first() == Some(&b'C') {
        read_byte(&mut reader, journal).await?;
        writer.write_all(body).await?;
    }
    // EOF lets the client finish draining before it hangs up on us
    drop(writer);
    read_rest(reader, journal).await
}

async fn serve_stalled(
    mut reader: BufReader<DuplexStream>,
    mut writer: DuplexStream,
    journal: &Journal,
    output: &[u8],
    hangup: CancellationToken,
) -> std::io::Result<()> {
    read_byte(&mut reader, journal).await?;
    writer.write_all(output).await?;
    hangup.cancelled().await;
    Ok(())
}

/// Returns the received directive and content unless the upload was refused.
async fn serve_sink(
    mut reader: BufReader<DuplexStream>,
    mut writer: DuplexStream,
    journal: &Journal,
    first: &Reply,
    second: &Reply,
) -> std::io::Result<Option<(rscp::control::Directive, Vec<u8>)>> {
    let mut line = Vec::new();
    reader.read_until(b'\n', &mut line).await?;
    journal.record(&line);
    writer.write_all(&first.encode()).await?;
    if let Reply::Error(_) = first {
        drop(writer);
        read_rest(reader, journal).await?;
        return Ok(None);
    }
    let directive = rscp::control::Directive::parse(&line)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    let mut data = Vec::new();
    (&mut reader)
        .take(directive.size + 1)
        .read_to_end(&mut data)
        .await?;
    journal.record(&data);
    if data.len() as u64 != directive.size + 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "short upload",
        ));
    }
    writer.write_all(&second.encode()).await?;
    drop(writer);
    read_rest(reader, journal).await?;
    if let Reply::Error(_) = second {
        return Ok(None);
    }
    data.pop();
    Ok(Some((directive, data)))
}
