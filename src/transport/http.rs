//! HTTP side of the relay: fetching chart images.

use std::{
    io::Write,
    path::{Path, PathBuf},
    time::Duration,
};

use futures::StreamExt;
use reqwest::{Client, StatusCode, Url};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::config::Credentials;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// DNS, connect, timeout or a broken body stream.
    #[error("request to `{url}` failed")]
    Transport { url: String, source: reqwest::Error },
    #[error("`{url}` answered {code} ({reason})")]
    Status {
        url: String,
        code: u16,
        reason: String,
    },
    #[error("cannot write `{}`", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl DownloadError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DownloadError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Downloads `url` to `file_path`, replacing any existing file.
///
/// Only a 200 response is written. The body is streamed into a temporary
/// file next to `file_path` and moved into place once complete, so on any
/// error an existing `file_path` is left untouched and a missing one is not
/// created.
pub async fn download_file(
    client: &Client,
    url: &Url,
    file_path: &Path,
    credentials: Option<&Credentials>,
) -> Result<u64, DownloadError> {
    let transport_err = |source| DownloadError::Transport {
        url: url.to_string(),
        source,
    };
    let io_err = |source| DownloadError::Io {
        path: file_path.to_path_buf(),
        source,
    };

    let mut request = client.get(url.clone());
    if let Some(creds) = credentials {
        request = request.basic_auth(&creds.username, Some(&creds.password));
    }
    let response = request.send().await.map_err(transport_err)?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(DownloadError::Status {
            url: url.to_string(),
            code: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        });
    }

    let dir = file_path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir).map_err(io_err)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(transport_err)?;
        file.write_all(&chunk).map_err(io_err)?;
        downloaded += chunk.len() as u64;
    }

    file.persist(file_path).map_err(|e| io_err(e.error))?;
    tracing::debug!(%url, bytes = downloaded, path = %file_path.display(), "downloaded");

    Ok(downloaded)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{fs, net::SocketAddr};

    use axum::{
        http::{header, HeaderMap, StatusCode},
        routing::get,
        Router,
    };
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    use super::*;

    const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nnot really a png";

    async fn serve(router: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn router() -> Router {
        Router::new()
            .route("/charts/MSLP_006.png", get(|| async { PNG_BYTES }))
            .route(
                "/private/MSLP_006.png",
                get(|headers: HeaderMap| async move {
                    // forecaster:hunter2
                    let expected = "Basic Zm9yZWNhc3RlcjpodW50ZXIy";
                    match headers.get(header::AUTHORIZATION) {
                        Some(v) if v == expected => (StatusCode::OK, PNG_BYTES),
                        _ => (StatusCode::UNAUTHORIZED, &b""[..]),
                    }
                }),
            )
            .route(
                "/moved/MSLP_006.png",
                get(|| async { (StatusCode::NO_CONTENT, "") }),
            )
    }

    fn client() -> Client {
        build_client(Duration::from_secs(5)).unwrap()
    }

    fn url(addr: SocketAddr, path: &str) -> Url {
        Url::parse(&format!("http://{addr}{path}")).unwrap()
    }

    #[tokio::test]
    async fn should_write_body_on_200() {
        let addr = serve(router()).await;
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("MSLP_006.png");

        let n = download_file(&client(), &url(addr, "/charts/MSLP_006.png"), &dest, None)
            .await
            .unwrap();

        assert_eq!(n, PNG_BYTES.len() as u64);
        assert_eq!(fs::read(&dest).unwrap(), PNG_BYTES);
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn should_not_create_file_on_404() {
        let addr = serve(router()).await;
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("missing.png");

        let err = download_file(&client(), &url(addr, "/charts/missing.png"), &dest, None)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert!(matches!(err, DownloadError::Status { ref reason, .. } if reason == "Not Found"));
        assert!(!dest.exists());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn should_keep_existing_file_on_error_status() {
        let addr = serve(router()).await;
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("MSLP_006.png");
        fs::write(&dest, b"yesterday").unwrap();

        let err = download_file(&client(), &url(addr, "/charts/nothing.png"), &dest, None)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert_eq!(fs::read(&dest).unwrap(), b"yesterday");
    }

    #[tokio::test]
    async fn should_treat_other_success_codes_as_errors() {
        let addr = serve(router()).await;
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("MSLP_006.png");

        let err = download_file(&client(), &url(addr, "/moved/MSLP_006.png"), &dest, None)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(204));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn should_send_basic_credentials() {
        let addr = serve(router()).await;
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("MSLP_006.png");
        let creds = Credentials {
            username: "forecaster".to_string(),
            password: "hunter2".to_string(),
        };

        let unauthenticated =
            download_file(&client(), &url(addr, "/private/MSLP_006.png"), &dest, None).await;
        assert_eq!(unauthenticated.unwrap_err().status(), Some(401));

        download_file(&client(), &url(addr, "/private/MSLP_006.png"), &dest, Some(&creds))
            .await
            .unwrap();
        assert_eq!(fs::read(&dest).unwrap(), PNG_BYTES);
    }

    #[tokio::test]
    async fn should_report_transport_errors_separately() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("x.png");

        let err = download_file(&client(), &url(addr, "/x.png"), &dest, None)
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::Transport { .. }));
        assert_eq!(err.status(), None);
        assert!(!dest.exists());
    }
}
