//! HTTP transport built on `reqwest`.
//!
//! # Managed servers
//!
//! A managed server publishes its current version at
//! `{server}/api/current-version` (either JSON `{"version": "..."}` or plain
//! text) and the OS-specific archive at `{server}/download/<archive>`.
//!
//! # Direct URLs
//!
//! For a user-provided URL the version token is taken from a `HEAD` request:
//! `ETag`, then `Last-Modified`, then the URL itself when the server sends
//! neither.

use crate::core::{OperatingSystemFamily, ScanJobError};
use crate::transport::credentials::{Credentials, ResolvedCredentials, ServerConfig};
use crate::transport::{ArtifactSource, ArtifactVersion, ConnectionFactory};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, ETAG, LAST_MODIFIED};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use std::time::Duration;
use url::Url;

/// Header some servers use to advertise the archive checksum.
const CHECKSUM_HEADER: &str = "x-checksum-sha256";

/// Creates `reqwest`-backed [`ArtifactSource`]s.
///
/// # Example
///
/// ```rust,ignore
/// use scanjob::transport::HttpConnectionFactory;
/// use std::time::Duration;
///
/// let factory = HttpConnectionFactory::new()
///     .with_timeout(Duration::from_secs(30))
///     .with_proxy("http://proxy.internal:3128");
/// ```
#[derive(Debug, Clone)]
pub struct HttpConnectionFactory {
    /// Request timeout.
    pub timeout: Duration,
    /// Proxy URL applied to all requests.
    pub proxy: Option<String>,
    /// Accept any TLS certificate.
    pub trust_all_certificates: bool,
}

impl Default for HttpConnectionFactory {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            proxy: None,
            trust_all_certificates: false,
        }
    }
}

impl HttpConnectionFactory {
    /// Creates a factory with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Routes all requests through a proxy.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Enables or disables certificate verification bypass.
    pub fn with_trust_all_certificates(mut self, trust: bool) -> Self {
        self.trust_all_certificates = trust;
        self
    }

    fn client(&self) -> Result<reqwest::Client, ScanJobError> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(ref proxy) = self.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| {
                ScanJobError::configuration(format!("invalid proxy '{}': {}", proxy, e))
            })?;
            builder = builder.proxy(proxy);
        }
        if self.trust_all_certificates {
            builder = builder.danger_accept_invalid_certs(true);
        }
        builder
            .build()
            .map_err(|e| ScanJobError::configuration(format!("failed to create HTTP client: {}", e)))
    }
}

impl ConnectionFactory for HttpConnectionFactory {
    fn connect_server(
        &self,
        server: &ServerConfig,
        os: OperatingSystemFamily,
    ) -> Result<Box<dyn ArtifactSource>, ScanJobError> {
        let auth = server.credentials.resolve()?;
        let base = with_trailing_slash(server.url.clone());
        Ok(Box::new(HttpArtifactSource {
            client: self.client()?,
            endpoint: base.to_string(),
            mode: SourceMode::Managed {
                base,
                archive: os.archive_name(),
            },
            auth: Some(auth),
        }))
    }

    fn connect_url(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn ArtifactSource>, ScanJobError> {
        let auth = credentials.map(Credentials::resolve).transpose()?;
        Ok(Box::new(HttpArtifactSource {
            client: self.client()?,
            endpoint: url.to_string(),
            mode: SourceMode::Direct { url: url.clone() },
            auth,
        }))
    }
}

#[derive(Debug)]
enum SourceMode {
    Managed {
        base: Url,
        archive: &'static str,
    },
    Direct {
        url: Url,
    },
}

/// An HTTP transport handle for one install step.
#[derive(Debug)]
pub struct HttpArtifactSource {
    client: reqwest::Client,
    endpoint: String,
    mode: SourceMode,
    auth: Option<ResolvedCredentials>,
}

impl HttpArtifactSource {
    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match self.auth {
            Some(ResolvedCredentials::Basic {
                ref username,
                ref password,
            }) => builder.basic_auth(username, Some(password.expose_secret())),
            Some(ResolvedCredentials::Bearer(ref token)) => {
                builder.bearer_auth(token.expose_secret())
            }
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response, ScanJobError> {
        builder
            .send()
            .await
            .map_err(|e| ScanJobError::network(&self.endpoint, e.to_string()))
    }

    fn join(&self, base: &Url, path: &str) -> Result<Url, ScanJobError> {
        base.join(path).map_err(|e| {
            ScanJobError::detect_configuration(format!(
                "cannot build '{}' from '{}': {}",
                path, base, e
            ))
        })
    }

    async fn managed_version(&self, base: &Url) -> Result<ArtifactVersion, ScanJobError> {
        let url = self.join(base, "api/current-version")?;
        let response = self.send(self.request(reqwest::Method::GET, url)).await?;
        check_status(&self.endpoint, response.status(), "version information")?;

        let checksum = advertised_checksum(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| ScanJobError::network(&self.endpoint, e.to_string()))?;

        let token = parse_version_body(&body).ok_or_else(|| {
            ScanJobError::install(format!("server '{}' reported an empty version", self.endpoint))
        })?;

        let mut version = ArtifactVersion::new(token);
        version.sha256 = checksum;
        Ok(version)
    }

    async fn direct_version(&self, url: &Url) -> Result<ArtifactVersion, ScanJobError> {
        let response = self
            .send(self.request(reqwest::Method::HEAD, url.clone()))
            .await?;

        // Servers without HEAD support still get a stable token.
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(ArtifactVersion::new(url.as_str()));
        }
        check_status(&self.endpoint, response.status(), "scanner archive")?;

        let headers = response.headers();
        let token = header_str(headers, ETAG.as_str())
            .or_else(|| header_str(headers, LAST_MODIFIED.as_str()))
            .unwrap_or_else(|| url.to_string());

        let mut version = ArtifactVersion::new(token);
        version.sha256 = advertised_checksum(headers);
        Ok(version)
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn latest_version(&self) -> Result<ArtifactVersion, ScanJobError> {
        match self.mode {
            SourceMode::Managed { ref base, .. } => self.managed_version(base).await,
            SourceMode::Direct { ref url } => self.direct_version(url).await,
        }
    }

    async fn fetch(&self, version: &ArtifactVersion) -> Result<Vec<u8>, ScanJobError> {
        let url = match self.mode {
            SourceMode::Managed { ref base, archive } => {
                self.join(base, &format!("download/{}", archive))?
            }
            SourceMode::Direct { ref url } => url.clone(),
        };

        tracing::debug!(
            endpoint = %self.endpoint,
            url = %url,
            version = %version.token,
            "Downloading scanner archive"
        );

        let response = self.send(self.request(reqwest::Method::GET, url)).await?;
        check_status(&self.endpoint, response.status(), "scanner archive")?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ScanJobError::network(&self.endpoint, e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

fn check_status(endpoint: &str, status: StatusCode, what: &str) -> Result<(), ScanJobError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ScanJobError::authentication(
            endpoint,
            format!("server returned {}", status),
        )),
        StatusCode::NOT_FOUND => Err(ScanJobError::install(format!(
            "{} not found at '{}'",
            what, endpoint
        ))),
        _ => Err(ScanJobError::network(
            endpoint,
            format!("unexpected status {} while requesting {}", status, what),
        )),
    }
}

fn parse_version_body(body: &str) -> Option<String> {
    let body = body.trim();
    let version = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => map
            .get("version")
            .and_then(|v| v.as_str())
            .map(str::to_string)?,
        Ok(serde_json::Value::String(s)) => s,
        _ => body.to_string(),
    };
    let version = version.trim().to_string();
    (!version.is_empty()).then_some(version)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn advertised_checksum(headers: &HeaderMap) -> Option<String> {
    header_str(headers, CHECKSUM_HEADER)
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves canned responses keyed by request line until the test ends.
    async fn serve(routes: Vec<(&'static str, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let mut read = 0;
                    while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf[read..]).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => read += n,
                        }
                    }
                    let request = String::from_utf8_lossy(&buf[..read]).to_string();
                    let line = request.lines().next().unwrap_or_default().to_string();
                    let response = routes
                        .iter()
                        .find(|(prefix, _)| line.starts_with(prefix))
                        .map(|(_, r)| r.clone())
                        .unwrap_or_else(|| {
                            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                                .to_string()
                        });
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}/", addr)
    }

    fn response(status: &str, headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n{}\r\n{}",
            status,
            body.len(),
            headers,
            body
        )
    }

    fn server(url: &str, credentials: Credentials) -> Box<dyn ArtifactSource> {
        HttpConnectionFactory::new()
            .with_timeout(Duration::from_secs(5))
            .connect_server(
                &ServerConfig::parse(url, credentials).unwrap(),
                OperatingSystemFamily::Linux,
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_managed_version_and_fetch() {
        let base = serve(vec![
            (
                "GET /api/current-version",
                response("200 OK", "x-checksum-sha256: abc123\r\n", r#"{"version":"2024.4.0"}"#),
            ),
            (
                "GET /download/scan.cli.zip",
                response("200 OK", "", "PK-archive-bytes"),
            ),
        ])
        .await;
        let source = server(&base, Credentials::api_token("token"));

        let version = source.latest_version().await.unwrap();
        assert_eq!(version.token, "2024.4.0");
        assert_eq!(version.sha256.as_deref(), Some("abc123"));

        let bytes = source.fetch(&version).await.unwrap();
        assert_eq!(bytes, b"PK-archive-bytes");
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_authentication_errors() {
        let base = serve(vec![(
            "GET /api/current-version",
            response("401 Unauthorized", "", ""),
        )])
        .await;
        let source = server(&base, Credentials::username_password("sysadmin", "wrong"));

        let err = source.latest_version().await.unwrap_err();
        assert!(matches!(err, ScanJobError::Authentication { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = server(&format!("http://{}/", addr), Credentials::api_token("token"));
        let err = source.latest_version().await.unwrap_err();
        assert!(matches!(err, ScanJobError::Network { .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_direct_url_uses_etag() {
        let base = serve(vec![(
            "HEAD /scanner.zip",
            response("200 OK", "etag: \"v42\"\r\n", ""),
        )])
        .await;
        let url = Url::parse(&format!("{}scanner.zip", base)).unwrap();
        let source = HttpConnectionFactory::new().connect_url(&url, None).unwrap();

        let version = source.latest_version().await.unwrap();
        assert_eq!(version.token, "\"v42\"");
    }

    #[tokio::test]
    async fn test_missing_archive_is_install_error() {
        let base = serve(vec![]).await;
        let url = Url::parse(&format!("{}missing.zip", base)).unwrap();
        let source = HttpConnectionFactory::new().connect_url(&url, None).unwrap();

        let err = source.fetch(&ArtifactVersion::new("x")).await.unwrap_err();
        assert!(matches!(err, ScanJobError::Install { .. }));
    }

    #[test]
    fn test_parse_version_body() {
        assert_eq!(parse_version_body(r#"{"version":"1.2.3"}"#).as_deref(), Some("1.2.3"));
        assert_eq!(parse_version_body("\"1.2.3\"").as_deref(), Some("1.2.3"));
        assert_eq!(parse_version_body(" 2024.1 \n").as_deref(), Some("2024.1"));
        assert_eq!(parse_version_body("   "), None);
    }

    #[test]
    fn test_bad_encoded_credentials_fail_at_connect() {
        let config = ServerConfig::parse(
            "https://scan.example.com",
            Credentials::encoded("sysadmin", "!!!"),
        )
        .unwrap();
        let err = HttpConnectionFactory::new()
            .connect_server(&config, OperatingSystemFamily::Linux)
            .unwrap_err();
        assert!(matches!(err, ScanJobError::Encryption { .. }));
    }

    #[test]
    fn test_trailing_slash() {
        let url = with_trailing_slash(Url::parse("https://scan.example.com/hub").unwrap());
        assert_eq!(url.as_str(), "https://scan.example.com/hub/");
        assert_eq!(
            url.join("api/current-version").unwrap().as_str(),
            "https://scan.example.com/hub/api/current-version"
        );
    }
}
