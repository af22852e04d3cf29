//! Command line path handling

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    session: remote::SshSession,
    path: String,
}

impl RemotePath {
    pub fn new(session: remote::SshSession, path: impl Into<String>) -> anyhow::Result<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(anyhow::anyhow!("Remote path must not be empty"));
        }
        Ok(Self { session, path })
    }

    pub fn session(&self) -> &remote::SshSession {
        &self.session
    }

    /// The path as given, relative paths are resolved by the peer against
    /// the remote user's home directory.
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathType {
    Local(std::path::PathBuf),
    Remote(RemotePath),
}

impl PathType {
    pub fn is_remote(&self) -> bool {
        matches!(self, PathType::Remote(_))
    }
}

/// Split `[user@]host[:port]:path` into its parts; anything else is local.
///
/// Paths starting with `/` or `.` are always local so that local files
/// containing a colon can still be named.
pub fn parse_path(path: &str) -> anyhow::Result<PathType> {
    if path.starts_with('/') || path.starts_with('.') {
        return Ok(PathType::Local(path.into()));
    }
    let re = regex::Regex::new(
        r"^(?:(?P<user>[^@]+)@)?(?P<host>(?:\[[^\]]+\]|[^:\[\]]+))(?::(?P<port>\d+))?:(?P<path>.+)$",
    )?;
    let Some(captures) = re.captures(path) else {
        return Ok(PathType::Local(path.into()));
    };
    let user = captures.name("user").map(|m| m.as_str().to_string());
    let host = captures
        .name("host")
        .map(|m| m.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing host in remote path {path:?}"))?;
    // [::1] style hosts lose their brackets
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
        .to_string();
    let port = match captures.name("port") {
        Some(port) => Some(
            port.as_str()
                .parse::<u16>()
                .map_err(|err| anyhow::anyhow!("Invalid port in {path:?}: {err}"))?,
        ),
        None => None,
    };
    let remote_path = captures
        .name("path")
        .map(|m| m.as_str())
        .ok_or_else(|| anyhow::anyhow!("Missing file system path in {path:?}"))?;
    Ok(PathType::Remote(RemotePath::new(
        remote::SshSession { user, host, port },
        remote_path,
    )?))
}

/// Where a downloaded file named `name` lands given the local destination.
///
/// The name comes from the remote peer so it must be a plain file name.
pub fn download_target(
    dst: &std::path::Path,
    dst_is_dir: bool,
    name: &str,
) -> anyhow::Result<std::path::PathBuf> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(anyhow::anyhow!(
            "Remote sent an unsafe file name {name:?}, refusing to write it"
        ));
    }
    if dst_is_dir {
        Ok(dst.join(name))
    } else {
        Ok(dst.to_path_buf())
    }
}

/// The file name announced to the remote sink for a local upload source.
pub fn upload_name(src: &std::path::Path) -> anyhow::Result<String> {
    let name = src
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Source path {:?} does not have a basename", src))?;
    name.to_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Source file name {:?} is not valid UTF-8", name))
}
