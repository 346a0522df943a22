//! HTTP and file transports for log mirrors and the write endpoint.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use tracing::info;

use crate::error::{ConfigError, FetchError, WriteError};
use crate::fetcher::Fetcher;
use crate::writer::LeafAdder;

/// Per-request timeout of the shared HTTP client.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle connections kept per host; sized for many concurrent workers.
pub const MAX_IDLE_CONNECTIONS_PER_HOST: usize = 256;

/// Path of the write endpoint relative to the write root.
pub const ADD_PATH: &str = "add";

/// Builds the HTTP client shared by all fetchers and the leaf adder.
///
/// # Errors
///
/// Returns `ConfigError::HttpClient` if the TLS backend fails to initialise.
pub fn http_client() -> Result<Client, ConfigError> {
    Client::builder()
        .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS_PER_HOST)
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(ConfigError::HttpClient)
}

/// Parses a log root URL, making sure relative paths resolve beneath it.
///
/// # Errors
///
/// Returns `ConfigError::InvalidLogUrl` if `url` is not an absolute URL.
pub fn parse_root(url: &str) -> Result<Url, ConfigError> {
    let mut root = Url::parse(url).map_err(|e| ConfigError::InvalidLogUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !root.path().ends_with('/') {
        let path = format!("{}/", root.path());
        root.set_path(&path);
    }
    Ok(root)
}

/// Builds the fetcher for one mirror.
///
/// # Errors
///
/// Returns a `ConfigError` for schemes other than `http`, `https` and `file`,
/// or for a `file` URL that is not a local path.
pub fn fetcher_for_root(
    root: &Url,
    client: &Client,
    bearer_token: Option<&str>,
) -> Result<Arc<dyn Fetcher>, ConfigError> {
    match root.scheme() {
        "http" | "https" => Ok(Arc::new(HttpFetcher::new(
            client.clone(),
            root.clone(),
            bearer_token.map(str::to_string),
        ))),
        "file" => {
            let path = root.to_file_path().map_err(|()| ConfigError::InvalidLogUrl {
                url: root.to_string(),
                reason: "not a local file path".to_string(),
            })?;
            Ok(Arc::new(FileFetcher::new(path)))
        }
        other => Err(ConfigError::UnsupportedScheme {
            scheme: other.to_string(),
        }),
    }
}

/// Fetches resources over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    root: Url,
    bearer_token: Option<String>,
}

impl HttpFetcher {
    /// Creates a fetcher for `root`, which should end in `/`.
    #[must_use]
    pub const fn new(client: Client, root: Url, bearer_token: Option<String>) -> Self {
        Self {
            client,
            root,
            bearer_token,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
        let url = self.root.join(path).map_err(|e| FetchError::InvalidPath {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        let mut request = self.client.get(url.clone());
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        match response.status() {
            StatusCode::OK => Ok(response.bytes().await?),
            StatusCode::NOT_FOUND => {
                info!(url = %url, "Not found");
                Err(FetchError::NotFound {
                    path: url.to_string(),
                })
            }
            status => Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }
}

/// Reads resources from a local directory.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    root: PathBuf,
}

impl FileFetcher {
    /// Creates a fetcher rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
        let relative = Path::new(path);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(FetchError::InvalidPath {
                path: path.to_string(),
                reason: "must be relative and stay beneath the log root".to_string(),
            });
        }

        let full = self.root.join(relative);
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(FetchError::NotFound {
                path: full.display().to_string(),
            }),
            Err(source) => Err(FetchError::Io {
                path: full.display().to_string(),
                source,
            }),
        }
    }
}

/// Adds leaves by POSTing them to the log's `add` endpoint.
#[derive(Debug, Clone)]
pub struct HttpLeafAdder {
    client: Client,
    url: Url,
    bearer_token: Option<String>,
}

impl HttpLeafAdder {
    /// Creates an adder posting to `<root>/add`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidLogUrl` if the endpoint URL cannot be
    /// formed from `root`.
    pub fn new(client: Client, root: &Url, bearer_token: Option<String>) -> Result<Self, ConfigError> {
        let url = root.join(ADD_PATH).map_err(|e| ConfigError::InvalidLogUrl {
            url: root.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client,
            url,
            bearer_token,
        })
    }

    /// Returns the endpoint URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

/// Reads the assigned index from the first line of a write response.
fn parse_index(body: &str) -> Result<u64, WriteError> {
    body.lines()
        .next()
        .and_then(|line| line.trim().parse().ok())
        .ok_or_else(|| WriteError::MalformedResponse {
            body: body.to_string(),
        })
}

#[async_trait]
impl LeafAdder for HttpLeafAdder {
    async fn add(&self, data: Bytes) -> Result<u64, WriteError> {
        let mut request = self.client.post(self.url.clone()).body(data);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            return Err(WriteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parse_index(&body)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;

    /// Answers one canned response per connection and forwards each request,
    /// head and body, to the returned channel.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                tx.send(request).unwrap();

                let response = format!(
                    "HTTP/1.1 {status} Canned\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        (addr, rx)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-request");
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf).to_string();
            let Some(head_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let content_length = text[..head_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .map_or(0, |(_, value)| value.trim().parse::<usize>().unwrap());
            if buf.len() >= head_end + 4 + content_length {
                return text;
            }
        }
    }

    fn root(addr: SocketAddr, path: &str) -> Url {
        parse_root(&format!("http://{addr}{path}")).unwrap()
    }

    #[test]
    fn test_parse_root_adds_trailing_slash() {
        assert_eq!(parse_root("http://log.example/a/b").unwrap().as_str(), "http://log.example/a/b/");
        assert_eq!(parse_root("http://log.example/a/").unwrap().as_str(), "http://log.example/a/");
        assert!(matches!(
            parse_root("not a url"),
            Err(ConfigError::InvalidLogUrl { .. })
        ));
    }

    #[test]
    fn test_unsupported_scheme() {
        let client = http_client().unwrap();
        let root = parse_root("ftp://log.example/").unwrap();
        assert!(matches!(
            fetcher_for_root(&root, &client, None),
            Err(ConfigError::UnsupportedScheme { scheme }) if scheme == "ftp"
        ));
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("42").unwrap(), 42);
        assert_eq!(parse_index("7\nextra\n").unwrap(), 7);
        assert!(matches!(
            parse_index("forty-two"),
            Err(WriteError::MalformedResponse { .. })
        ));
        assert!(parse_index("").is_err());
    }

    #[tokio::test]
    async fn test_http_fetcher_status_mapping() {
        let (addr, mut requests) = serve(vec![(200, "leaf data"), (404, ""), (500, "boom")]).await;
        let fetcher = fetcher_for_root(&root(addr, "/log"), &http_client().unwrap(), Some("s3cret")).unwrap();

        assert_eq!(fetcher.fetch("checkpoint").await.unwrap(), Bytes::from("leaf data"));
        let request = requests.recv().await.unwrap();
        assert!(request.starts_with("GET /log/checkpoint HTTP/1.1"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer s3cret"));

        assert!(fetcher.fetch("seq/00/00/00/00/00").await.unwrap_err().is_not_found());
        match fetcher.fetch("seq/00/00/00/00/01").await {
            Err(FetchError::Status { status: 500, .. }) => {}
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_leaf_adder() {
        let (addr, mut requests) = serve(vec![(200, "17\n"), (503, "overloaded"), (200, "?")]).await;
        let adder = HttpLeafAdder::new(http_client().unwrap(), &root(addr, "/log"), None).unwrap();
        assert_eq!(adder.url().path(), "/log/add");

        assert_eq!(adder.add(Bytes::from("payload 1")).await.unwrap(), 17);
        let request = requests.recv().await.unwrap();
        assert!(request.starts_with("POST /log/add HTTP/1.1"));
        assert!(request.ends_with("payload 1"));

        match adder.add(Bytes::from("payload 2")).await {
            Err(WriteError::Status { status: 503, body }) => assert_eq!(body, "overloaded"),
            other => panic!("expected status error, got {other:?}"),
        }
        assert!(matches!(
            adder.add(Bytes::from("payload 3")).await,
            Err(WriteError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn test_file_fetcher() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("seq/00/00/00/00")).unwrap();
        std::fs::write(dir.path().join("checkpoint"), b"example.com/log\n1\n").unwrap();
        std::fs::write(dir.path().join("seq/00/00/00/00/00"), b"leaf zero").unwrap();

        let root = Url::from_directory_path(dir.path()).unwrap();
        let fetcher = fetcher_for_root(&root, &http_client().unwrap(), None).unwrap();

        assert_eq!(fetcher.fetch("checkpoint").await.unwrap(), Bytes::from("example.com/log\n1\n"));
        assert_eq!(fetcher.fetch("seq/00/00/00/00/00").await.unwrap(), Bytes::from("leaf zero"));
        assert!(fetcher.fetch("seq/00/00/00/00/01").await.unwrap_err().is_not_found());
        assert!(matches!(
            fetcher.fetch("../outside").await,
            Err(FetchError::InvalidPath { .. })
        ));
    }
}
