use anyhow::{Context, anyhow};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use rscp::path;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "rscp",
    version,
    about = "Copy a single file to or from a remote host using the scp protocol",
    long_about = "`rscp` copies exactly one regular file between this host and a remote host by driving the remote `scp` program over ssh.

Exactly one of SRC and DST must be remote, written as `[user@]host[:port]:path`. Use `localhost:` to run the peer locally without ssh.

EXAMPLES:
    # Download into the current directory
    rscp host:/var/log/syslog ./

    # Upload into a remote directory
    rscp ./report.csv user@host:2222:/srv/incoming

    # Show a transfer summary
    rscp host:/data/blob.bin /tmp/blob.bin --summary"
)]
struct Args {
    // Progress & output
    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Verbose level (implies "summary"): -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Quiet mode, don't report errors or remote warnings
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Transfer settings
    /// Largest chunk read from the remote peer during downloads
    #[arg(
        long,
        default_value = "1KiB",
        value_name = "SIZE",
        help_heading = "Transfer settings"
    )]
    chunk_size: bytesize::ByteSize,

    /// Number of chunks buffered between the network and the local file
    #[arg(
        long,
        default_value = "16",
        value_name = "N",
        help_heading = "Transfer settings"
    )]
    pipe_capacity: usize,

    /// How long to wait for the remote scp to exit after the transfer
    ///
    /// Accepts human-readable durations like "500ms", "5s", "1min".
    #[arg(
        long,
        default_value = "5s",
        value_name = "DURATION",
        help_heading = "Transfer settings"
    )]
    close_timeout: String,

    // Remote host options
    /// Record host keys of hosts not yet present in known_hosts
    #[arg(long, help_heading = "Remote host options")]
    accept_unknown_hosts: bool,

    /// Program to run for `localhost:` transfers
    #[arg(
        long,
        default_value = "scp",
        value_name = "PATH",
        help_heading = "Remote host options"
    )]
    local_scp: String,

    // Advanced settings
    /// Number of worker threads (0 = number of CPU cores)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads (0 = Tokio default of 512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,

    // ARGUMENTS
    /// Source path
    #[arg()]
    src: String,

    /// Destination path
    #[arg()]
    dst: String,
}

#[derive(Debug)]
enum Direction {
    Download,
    Upload,
}

#[derive(Debug)]
struct Summary {
    direction: Direction,
    name: String,
    bytes: u64,
    elapsed: std::time::Duration,
    warnings: usize,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let verb = match self.direction {
            Direction::Download => "downloaded",
            Direction::Upload => "uploaded",
        };
        // sub-millisecond precision is noise here
        let elapsed = std::time::Duration::from_millis(self.elapsed.as_millis() as u64);
        write!(
            f,
            "file {}: {}\n\
            bytes: {}\n\
            elapsed: {}\n\
            remote warnings: {}",
            verb,
            self.name,
            bytesize::ByteSize(self.bytes),
            humantime::format_duration(elapsed),
            self.warnings,
        )
    }
}

fn settings(args: &Args) -> anyhow::Result<rscp::Settings> {
    let chunk_size = usize::try_from(args.chunk_size.0)
        .map_err(|_| anyhow!("chunk size {} is too large", args.chunk_size))?;
    let settings = rscp::Settings {
        chunk_size,
        pipe_capacity: args.pipe_capacity,
    };
    settings.validate().map_err(|err| anyhow!(err))?;
    Ok(settings)
}

fn close_timeout(args: &Args) -> anyhow::Result<std::time::Duration> {
    humantime::parse_duration(&args.close_timeout)
        .with_context(|| format!("invalid --close-timeout {:?}", args.close_timeout))
}

#[instrument(skip(session, settings))]
async fn download<S: remote::Session>(
    session: &S,
    src: &path::RemotePath,
    dst: &std::path::Path,
    settings: &rscp::Settings,
) -> anyhow::Result<Summary> {
    let start = std::time::Instant::now();
    let dst_is_dir = tokio::fs::metadata(dst)
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false);
    let file = rscp::read_file(session, src.path(), settings)
        .await
        .with_context(|| format!("failed to start download of {:?}", src.path()))?;
    let target = path::download_target(dst, dst_is_dir, file.name())?;
    let name = file.name().to_string();
    let permissions = file.permissions();
    let mut content = file.into_content();
    let mut out = tokio::fs::File::create(&target)
        .await
        .with_context(|| format!("cannot create {target:?}"))?;
    let copied = match tokio::io::copy(&mut content, &mut out).await {
        Ok(copied) => copied,
        Err(error) => {
            content.cancel();
            // the transfer's own error explains a failed read better than its I/O rendering
            return match content.finish().await {
                Err(transfer) if !matches!(transfer, rscp::Error::Cancelled) => {
                    Err(transfer).with_context(|| format!("failed to download {:?}", src.path()))
                }
                _ => Err(error).with_context(|| format!("failed writing {target:?}")),
            };
        }
    };
    content
        .finish()
        .await
        .with_context(|| format!("failed to download {:?}", src.path()))?;
    out.flush().await?;
    tokio::fs::set_permissions(&target, permissions)
        .await
        .with_context(|| format!("cannot set permissions of {target:?}"))?;
    tracing::info!("downloaded {:?} into {:?}", name, target);
    Ok(Summary {
        direction: Direction::Download,
        name,
        bytes: copied,
        elapsed: start.elapsed(),
        warnings: 0,
    })
}

#[instrument(skip(session))]
async fn upload<S: remote::Session>(
    session: &S,
    src: &std::path::Path,
    dst: &path::RemotePath,
    quiet: bool,
) -> anyhow::Result<Summary> {
    use std::os::unix::fs::PermissionsExt;
    let start = std::time::Instant::now();
    let metadata = tokio::fs::metadata(src)
        .await
        .with_context(|| format!("cannot read metadata of {src:?}"))?;
    if !metadata.is_file() {
        return Err(anyhow!("{src:?} is not a regular file"));
    }
    let name = path::upload_name(src)?;
    let reader = tokio::fs::File::open(src)
        .await
        .with_context(|| format!("cannot open {src:?} for reading"))?;
    let file = rscp::File::new(
        name.clone(),
        metadata.len(),
        metadata.permissions().mode(),
        tokio::io::BufReader::new(reader),
    );
    let warnings = rscp::write_file(session, dst.path(), file)
        .await
        .with_context(|| format!("failed to upload {src:?} to {:?}", dst.path()))?;
    if !quiet {
        for warning in &warnings {
            eprintln!("rscp: remote warning: {warning}");
        }
    }
    tracing::info!("uploaded {:?} into {:?}", name, dst.path());
    Ok(Summary {
        direction: Direction::Upload,
        name,
        bytes: metadata.len(),
        elapsed: start.elapsed(),
        warnings: warnings.len(),
    })
}

async fn transfer<S: remote::Session>(
    session: &S,
    src: &path::PathType,
    dst: &path::PathType,
    args: &Args,
) -> anyhow::Result<Summary> {
    match (src, dst) {
        (path::PathType::Remote(src), path::PathType::Local(dst)) => {
            download(session, src, dst, &settings(args)?).await
        }
        (path::PathType::Local(src), path::PathType::Remote(dst)) => {
            upload(session, src, dst, args.quiet).await
        }
        _ => Err(anyhow!(
            "exactly one of the source and destination paths must be remote"
        )),
    }
}

async fn async_main(args: Args) -> anyhow::Result<Summary> {
    let src = path::parse_path(&args.src)?;
    let dst = path::parse_path(&args.dst)?;
    let remote_path = match (&src, &dst) {
        (path::PathType::Remote(remote_path), path::PathType::Local(_))
        | (path::PathType::Local(_), path::PathType::Remote(remote_path)) => remote_path.clone(),
        (path::PathType::Remote(_), path::PathType::Remote(_)) => {
            return Err(anyhow!(
                "copying between two remote hosts is not supported, one side must be local"
            ));
        }
        (path::PathType::Local(_), path::PathType::Local(_)) => {
            return Err(anyhow!(
                "both paths are local, one side must be remote ([user@]host[:port]:path)"
            ));
        }
    };
    let close_timeout = close_timeout(&args)?;
    if remote_path.session().is_local() {
        tracing::debug!("running {} locally", args.local_scp);
        let session =
            remote::local::LocalSession::with_program(&args.local_scp).close_timeout(close_timeout);
        transfer(&session, &src, &dst, &args).await
    } else {
        let ssh_settings = remote::ssh::Settings {
            host_key_policy: if args.accept_unknown_hosts {
                remote::ssh::HostKeyPolicy::Add
            } else {
                remote::ssh::HostKeyPolicy::Strict
            },
            close_timeout,
        };
        let session =
            remote::ssh::OpenSshSession::connect(remote_path.session(), &ssh_settings).await?;
        transfer(&session, &src, &dst, &args).await
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(output, runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
