//! Moving bytes: HTTP downloads from the chart sources and FTP uploads to
//! the archive.

pub mod ftp;
pub mod http;
pub mod remote_dir;

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

use reqwest::{Client, Url};

pub use ftp::UploadError;
pub use http::DownloadError;
pub use remote_dir::RemotePath;

use crate::config::{Archive, Credentials};

/// What the pipeline needs from the network.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn download(
        &self,
        url: &Url,
        destination: &Path,
        credentials: Option<&Credentials>,
    ) -> Result<(), DownloadError>;

    /// Stores `local` inside `remote_dir` on the archive and returns the
    /// remote file path.
    async fn upload(
        &self,
        local: &Path,
        archive: &Archive,
        remote_dir: &RemotePath,
    ) -> Result<String, UploadError>;
}

/// `reqwest` for downloads, `suppaftp` for uploads.
///
/// Uploads under the same top-level remote directory are serialised, so
/// sibling directories such as `project/<day>/META` and `project/<day>/METB`
/// are never provisioned at the same time.
pub struct HttpFtpTransport {
    client: Client,
    tree_locks: Mutex<HashMap<RemotePath, Arc<tokio::sync::Mutex<()>>>>,
}

impl HttpFtpTransport {
    pub fn new(client: Client) -> Self {
        HttpFtpTransport {
            client,
            tree_locks: Mutex::new(HashMap::new()),
        }
    }

    fn tree_lock(&self, dir: &RemotePath) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .tree_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(dir.root()).or_default())
    }
}

impl Transport for HttpFtpTransport {
    async fn download(
        &self,
        url: &Url,
        destination: &Path,
        credentials: Option<&Credentials>,
    ) -> Result<(), DownloadError> {
        http::download_file(&self.client, url, destination, credentials).await?;
        Ok(())
    }

    async fn upload(
        &self,
        local: &Path,
        archive: &Archive,
        remote_dir: &RemotePath,
    ) -> Result<String, UploadError> {
        let lock = self.tree_lock(remote_dir);
        let _guard = lock.lock().await;

        let local = local.to_path_buf();
        let archive = archive.clone();
        let remote_dir = remote_dir.clone();
        tokio::task::spawn_blocking(move || ftp::upload_blocking(&local, &archive, &remote_dir))
            .await?
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_share_lock_between_sibling_directories() {
        let transport = HttpFtpTransport::new(Client::new());

        let meta = transport.tree_lock(&RemotePath::parse("project/20240101/META"));
        let metb = transport.tree_lock(&RemotePath::parse("project/20240101/METB"));
        let other = transport.tree_lock(&RemotePath::parse("public/20240101"));

        assert!(Arc::ptr_eq(&meta, &metb));
        assert!(!Arc::ptr_eq(&meta, &other));
    }

    #[tokio::test]
    async fn should_hold_tree_lock_across_sibling_uploads() {
        let transport = HttpFtpTransport::new(Client::new());
        let meta = transport.tree_lock(&RemotePath::parse("project/20240101/META"));
        let _guard = meta.lock().await;

        let metb = transport.tree_lock(&RemotePath::parse("project/20240101/METB"));

        assert!(metb.try_lock().is_err());
    }
}
