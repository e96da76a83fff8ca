//! FTP side of the relay: archive sessions, uploads and server-side copies.

use std::{
    fs::File,
    io::{self, Cursor, Read},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
    time::Duration,
};

use suppaftp::{types::FileType, FtpError, FtpResult, FtpStream};
use thiserror::Error;

use super::remote_dir::{ensure_and_enter, RemoteDirectoryError, RemotePath};
use crate::config::Archive;

const DEFAULT_FTP_PORT: u16 = 21;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Ftp(FtpError),
    #[error("server rejected request: {0}")]
    Rejected(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("cannot connect to archive `{address}`")]
    Connect {
        address: String,
        source: SessionError,
    },
    #[error("login as `{user}` refused")]
    Login { user: String, source: SessionError },
    #[error(transparent)]
    Directory(#[from] RemoteDirectoryError),
    #[error("cannot read local file `{}`", path.display())]
    LocalRead { path: PathBuf, source: io::Error },
    #[error("cannot store `{remote}`")]
    Store {
        remote: String,
        source: SessionError,
    },
    #[error("upload worker failed")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error(transparent)]
    Connect(#[from] UploadError),
    #[error(transparent)]
    Directory(#[from] RemoteDirectoryError),
    #[error("{op} `{path}` failed")]
    Session {
        op: &'static str,
        path: String,
        source: SessionError,
    },
}

impl From<FtpError> for SessionError {
    fn from(e: FtpError) -> Self {
        match e {
            FtpError::UnexpectedResponse(response) => SessionError::Rejected(format!(
                "{} {}",
                response.status.code(),
                String::from_utf8_lossy(&response.body).trim()
            )),
            other => SessionError::Ftp(other),
        }
    }
}

/// The FTP commands the relay needs, over whichever session implements them.
pub trait FtpSession {
    /// `LIST` of the current directory, one line per entry.
    fn list(&mut self) -> Result<Vec<String>, SessionError>;
    fn list_path(&mut self, path: &str) -> Result<Vec<String>, SessionError>;
    fn mkdir(&mut self, name: &str) -> Result<(), SessionError>;
    fn cwd(&mut self, path: &str) -> Result<(), SessionError>;
    fn store(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64, SessionError>;
    fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, SessionError>;
    fn quit(&mut self) -> Result<(), SessionError>;
}

impl<S: FtpSession + ?Sized> FtpSession for &mut S {
    fn list(&mut self) -> Result<Vec<String>, SessionError> {
        (**self).list()
    }

    fn list_path(&mut self, path: &str) -> Result<Vec<String>, SessionError> {
        (**self).list_path(path)
    }

    fn mkdir(&mut self, name: &str) -> Result<(), SessionError> {
        (**self).mkdir(name)
    }

    fn cwd(&mut self, path: &str) -> Result<(), SessionError> {
        (**self).cwd(path)
    }

    fn store(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64, SessionError> {
        (**self).store(name, reader)
    }

    fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, SessionError> {
        (**self).retrieve(name)
    }

    fn quit(&mut self) -> Result<(), SessionError> {
        (**self).quit()
    }
}

impl FtpSession for FtpStream {
    fn list(&mut self) -> Result<Vec<String>, SessionError> {
        Ok(FtpStream::list(self, None)?)
    }

    fn list_path(&mut self, path: &str) -> Result<Vec<String>, SessionError> {
        Ok(FtpStream::list(self, Some(path))?)
    }

    fn mkdir(&mut self, name: &str) -> Result<(), SessionError> {
        Ok(FtpStream::mkdir(self, name)?)
    }

    fn cwd(&mut self, path: &str) -> Result<(), SessionError> {
        Ok(FtpStream::cwd(self, path)?)
    }

    fn store(&mut self, name: &str, mut reader: &mut dyn Read) -> Result<u64, SessionError> {
        Ok(self.put_file(name, &mut reader)?)
    }

    fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, SessionError> {
        Ok(self.retr_as_buffer(name)?.into_inner())
    }

    fn quit(&mut self) -> Result<(), SessionError> {
        Ok(FtpStream::quit(self)?)
    }
}

/// A logged-in archive session that sends `QUIT` when dropped.
pub struct ArchiveConnection<S: FtpSession> {
    session: S,
}

impl<S: FtpSession> ArchiveConnection<S> {
    pub fn new(session: S) -> Self {
        ArchiveConnection { session }
    }
}

impl ArchiveConnection<FtpStream> {
    /// Connects, logs in and switches to binary transfers.
    pub fn open(archive: &Archive) -> Result<Self, UploadError> {
        let connect_err = |source| UploadError::Connect {
            address: archive.address.clone(),
            source,
        };

        let timeout = archive.timeout;
        let addr = resolve_address(&archive.address).map_err(|e| connect_err(e.into()))?;
        let stream = FtpStream::connect_timeout(addr, timeout)
            .map_err(|e| connect_err(e.into()))?
            .passive_stream_builder(move |addr| data_stream(addr, timeout));
        bound_socket(stream.get_ref(), timeout).map_err(|e| connect_err(e.into()))?;

        // Wrap before login so a refused login still sends QUIT.
        let mut conn = ArchiveConnection::new(stream);
        let creds = &archive.credentials;
        conn.session
            .login(&creds.username, &creds.password)
            .map_err(|e| UploadError::Login {
                user: creds.username.clone(),
                source: e.into(),
            })?;
        conn.session
            .transfer_type(FileType::Binary)
            .map_err(|e| connect_err(e.into()))?;

        tracing::debug!(address = %archive.address, "archive session open");
        Ok(conn)
    }
}

impl<S: FtpSession> Deref for ArchiveConnection<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: FtpSession> DerefMut for ArchiveConnection<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: FtpSession> Drop for ArchiveConnection<S> {
    fn drop(&mut self) {
        if let Err(e) = self.session.quit() {
            tracing::debug!(error = %e, "QUIT failed");
        }
    }
}

fn bound_socket(socket: &TcpStream, timeout: Duration) -> io::Result<()> {
    socket.set_read_timeout(Some(timeout))?;
    socket.set_write_timeout(Some(timeout))
}

/// Opens a passive data connection with the same bounds as the control
/// connection.
fn data_stream(addr: SocketAddr, timeout: Duration) -> FtpResult<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, timeout).map_err(FtpError::ConnectionError)?;
    bound_socket(&stream, timeout).map_err(FtpError::ConnectionError)?;
    Ok(stream)
}

fn resolve_address(address: &str) -> io::Result<SocketAddr> {
    let with_port = if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{DEFAULT_FTP_PORT}")
    };

    with_port.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no address for `{address}`"))
    })
}

/// Provisions `remote_dir` and stores `local` there under its base name.
/// Returns the remote path of the stored file.
pub fn store_file<S: FtpSession + ?Sized>(
    session: &mut S,
    local: &Path,
    remote_dir: &RemotePath,
) -> Result<String, UploadError> {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| UploadError::LocalRead {
            path: local.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        })?;
    let mut file = File::open(local).map_err(|source| UploadError::LocalRead {
        path: local.to_path_buf(),
        source,
    })?;

    ensure_and_enter(session, remote_dir)?;

    let remote = remote_dir.file(&name);
    let bytes = session
        .store(&name, &mut file)
        .map_err(|source| UploadError::Store {
            remote: remote.clone(),
            source,
        })?;
    tracing::debug!(%remote, bytes, "stored");

    Ok(remote)
}

/// Opens an archive session, stores one file and closes the session again.
/// Blocking; run it off the async runtime.
pub fn upload_blocking(
    local: &Path,
    archive: &Archive,
    remote_dir: &RemotePath,
) -> Result<String, UploadError> {
    let mut conn = ArchiveConnection::open(archive)?;
    store_file(&mut *conn, local, remote_dir)
}

/// Copies the files in `names` that exist in `source_dir` into `target_dir`,
/// creating the target if needed. Returns the names that were copied.
pub fn copy_between<S: FtpSession + ?Sized>(
    session: &mut S,
    source_dir: &RemotePath,
    target_dir: &RemotePath,
    names: &[String],
) -> Result<Vec<String>, CopyError> {
    let session_err = |op, path: &str| {
        let path = path.to_string();
        move |source| CopyError::Session { op, path, source }
    };
    let source = source_dir.to_string();
    let target = target_dir.to_string();

    ensure_and_enter(session, target_dir)?;
    session.cwd("/").map_err(session_err("CWD", "/"))?;

    let listing = if source_dir.segments().is_empty() {
        session.list()
    } else {
        session.list_path(&source)
    }
    .map_err(session_err("LIST", &source))?;

    let mut copied = Vec::new();
    for entry in listing.iter().filter_map(|line| line.split_whitespace().last()) {
        if !names.iter().any(|n| n == entry) {
            continue;
        }
        tracing::info!(file = entry, from = %source, to = %target, "copying");

        enter_from_root(session, &source).map_err(session_err("CWD", &source))?;
        let bytes = session
            .retrieve(entry)
            .map_err(session_err("RETR", &source_dir.file(entry)))?;

        enter_from_root(session, &target).map_err(session_err("CWD", &target))?;
        session
            .store(entry, &mut Cursor::new(bytes))
            .map_err(session_err("STOR", &target_dir.file(entry)))?;

        session.cwd("/").map_err(session_err("CWD", "/"))?;
        copied.push(entry.to_string());
    }

    Ok(copied)
}

fn enter_from_root<S: FtpSession + ?Sized>(session: &mut S, dir: &str) -> Result<(), SessionError> {
    session.cwd("/")?;
    if !dir.is_empty() && dir != "/" {
        session.cwd(dir)?;
    }
    Ok(())
}

/// Opens an archive session and runs [`copy_between`] on it. Blocking.
pub fn copy_blocking(
    archive: &Archive,
    source_dir: &RemotePath,
    target_dir: &RemotePath,
    names: &[String],
) -> Result<Vec<String>, CopyError> {
    let mut conn = ArchiveConnection::open(archive)?;
    copy_between(&mut *conn, source_dir, target_dir, names)
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-memory FTP server tree.

    use std::collections::{BTreeMap, BTreeSet};

    use super::*;

    #[derive(Debug, Default)]
    pub struct MemorySession {
        dirs: BTreeSet<String>,
        files: BTreeMap<String, Vec<u8>>,
        cwd: Vec<String>,
        denied: BTreeSet<String>,
        after_listing: Option<(String, String)>,
        pub mkdir_calls: Vec<String>,
        pub retrieved: Vec<String>,
        pub quit_calls: usize,
    }

    impl MemorySession {
        pub fn add_dir(&mut self, path: &str) {
            let mut current = String::new();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                current = format!("{current}/{segment}");
                self.dirs.insert(current.clone());
            }
        }

        pub fn add_file(&mut self, path: &str, bytes: &[u8]) {
            let path = format!("/{}", path.trim_start_matches('/'));
            if let Some((dir, _)) = path.rsplit_once('/') {
                self.add_dir(dir);
            }
            self.files.insert(path, bytes.to_vec());
        }

        pub fn deny_mkdir(&mut self, name: &str) {
            self.denied.insert(name.to_string());
        }

        /// Creates `path` right after the next `LIST` of `listed`, as another
        /// connection would.
        pub fn create_after_listing(&mut self, listed: &str, path: &str) {
            self.after_listing = Some((listed.to_string(), path.to_string()));
        }

        pub fn file(&self, path: &str) -> Option<&Vec<u8>> {
            self.files.get(&format!("/{}", path.trim_start_matches('/')))
        }

        pub fn cwd_path(&self) -> String {
            format!("/{}", self.cwd.join("/"))
        }

        pub fn dir_count(&self) -> usize {
            self.dirs.len()
        }

        fn resolve(&self, path: &str) -> Vec<String> {
            let mut parts = if path.starts_with('/') { Vec::new() } else { self.cwd.clone() };
            parts.extend(path.split('/').filter(|s| !s.is_empty()).map(str::to_string));
            parts
        }

        fn abs(parts: &[String]) -> String {
            format!("/{}", parts.join("/"))
        }

        fn listing(&self, dir: &[String]) -> Vec<String> {
            let prefix = if dir.is_empty() { "/".to_string() } else { format!("{}/", Self::abs(dir)) };
            let child = |path: &String| {
                path.strip_prefix(&prefix)
                    .filter(|rest| !rest.is_empty() && !rest.contains('/'))
                    .map(str::to_string)
            };

            let mut lines: Vec<String> = self
                .dirs
                .iter()
                .filter_map(&child)
                .map(|name| format!("drwxr-xr-x    2 ftp      ftp          4096 Jan 01 00:00 {name}"))
                .collect();
            lines.extend(self.files.iter().filter_map(|(path, bytes)| {
                child(path).map(|name| {
                    format!("-rw-r--r--    1 ftp      ftp    {:>10} Jan 01 00:00 {name}", bytes.len())
                })
            }));
            lines
        }
    }

    impl FtpSession for MemorySession {
        fn list(&mut self) -> Result<Vec<String>, SessionError> {
            let lines = self.listing(&self.cwd);
            if self
                .after_listing
                .as_ref()
                .is_some_and(|(listed, _)| *listed == self.cwd_path())
            {
                if let Some((_, path)) = self.after_listing.take() {
                    self.add_dir(&path);
                }
            }
            Ok(lines)
        }

        fn list_path(&mut self, path: &str) -> Result<Vec<String>, SessionError> {
            let dir = self.resolve(path);
            if !dir.is_empty() && !self.dirs.contains(&Self::abs(&dir)) {
                return Err(SessionError::Rejected(format!("550 {path}: no such directory")));
            }
            Ok(self.listing(&dir))
        }

        fn mkdir(&mut self, name: &str) -> Result<(), SessionError> {
            self.mkdir_calls.push(name.to_string());
            if self.denied.contains(name) {
                return Err(SessionError::Rejected(format!("550 {name}: permission denied")));
            }
            let path = Self::abs(&self.resolve(name));
            if !self.dirs.insert(path) {
                return Err(SessionError::Rejected(format!("550 {name}: file exists")));
            }
            Ok(())
        }

        fn cwd(&mut self, path: &str) -> Result<(), SessionError> {
            let target = self.resolve(path);
            if !target.is_empty() && !self.dirs.contains(&Self::abs(&target)) {
                return Err(SessionError::Rejected(format!("550 {path}: no such directory")));
            }
            self.cwd = target;
            Ok(())
        }

        fn store(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64, SessionError> {
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes)?;
            let len = bytes.len() as u64;
            self.files.insert(Self::abs(&self.resolve(name)), bytes);
            Ok(len)
        }

        fn retrieve(&mut self, name: &str) -> Result<Vec<u8>, SessionError> {
            let path = Self::abs(&self.resolve(name));
            self.retrieved.push(path.clone());
            self.files
                .get(&path)
                .cloned()
                .ok_or_else(|| SessionError::Rejected(format!("550 {name}: no such file")))
        }

        fn quit(&mut self) -> Result<(), SessionError> {
            self.quit_calls += 1;
            Ok(())
        }
    }
}

// -- Tests -------------------------------------------------------------------
