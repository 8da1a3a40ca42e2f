//! Server configuration and credential material.

use crate::core::ScanJobError;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Credentials presented to a scanner distribution server.
///
/// Secrets are held in [`SecretString`] and never appear in `Debug` output.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Plain username and password.
    UsernamePassword {
        /// Account name.
        username: String,
        /// Account password (kept secret).
        password: SecretString,
    },
    /// An API token sent as a bearer token.
    ApiToken(SecretString),
    /// A username with base64-encoded password material, decoded when a
    /// connection is opened.
    Encoded {
        /// Account name.
        username: String,
        /// Base64 password material (kept secret).
        material: SecretString,
    },
}

impl Credentials {
    /// Creates username/password credentials.
    pub fn username_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::UsernamePassword {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Creates API token credentials.
    pub fn api_token(token: impl Into<String>) -> Self {
        Self::ApiToken(SecretString::from(token.into()))
    }

    /// Creates credentials from encoded password material.
    pub fn encoded(username: impl Into<String>, material: impl Into<String>) -> Self {
        Self::Encoded {
            username: username.into(),
            material: SecretString::from(material.into()),
        }
    }

    /// Decodes the credential material into something a transport can send.
    ///
    /// # Errors
    ///
    /// Returns `ScanJobError::Encryption` if encoded material is not valid
    /// base64, does not decode to UTF-8, or is empty.
    pub fn resolve(&self) -> Result<ResolvedCredentials, ScanJobError> {
        match self {
            Self::UsernamePassword { username, password } => Ok(ResolvedCredentials::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            Self::ApiToken(token) => {
                if token.expose_secret().trim().is_empty() {
                    return Err(ScanJobError::encryption("API token is empty"));
                }
                Ok(ResolvedCredentials::Bearer(token.clone()))
            }
            Self::Encoded { username, material } => {
                let bytes = STANDARD
                    .decode(material.expose_secret().trim())
                    .map_err(|e| ScanJobError::encryption(format!("invalid base64: {}", e)))?;
                let password = String::from_utf8(bytes).map_err(|_| {
                    ScanJobError::encryption("decoded password is not valid UTF-8")
                })?;
                if password.is_empty() {
                    return Err(ScanJobError::encryption("decoded password is empty"));
                }
                Ok(ResolvedCredentials::Basic {
                    username: username.clone(),
                    password: SecretString::from(password),
                })
            }
        }
    }
}

/// Credentials ready to be attached to a request.
#[derive(Debug, Clone)]
pub enum ResolvedCredentials {
    /// HTTP basic authentication.
    Basic {
        /// Account name.
        username: String,
        /// Account password (kept secret).
        password: SecretString,
    },
    /// Bearer token authentication.
    Bearer(SecretString),
}

/// Connection settings for a managed scanner server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Base URL of the server.
    pub url: Url,
    /// Credentials for the server.
    pub credentials: Credentials,
}

impl ServerConfig {
    /// Creates a configuration from an already parsed URL.
    pub fn new(url: Url, credentials: Credentials) -> Self {
        Self { url, credentials }
    }

    /// Parses and validates the server URL.
    ///
    /// # Errors
    ///
    /// Returns `ScanJobError::DetectConfiguration` for malformed URLs.
    pub fn parse(url: &str, credentials: Credentials) -> Result<Self, ScanJobError> {
        Ok(Self::new(validate_url(url)?, credentials))
    }
}

/// Parses a URL and checks that it is an absolute http(s) URL with a host.
pub fn validate_url(raw: &str) -> Result<Url, ScanJobError> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        ScanJobError::detect_configuration(format!("'{}' is not a valid URL: {}", raw, e))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ScanJobError::detect_configuration(format!(
            "'{}' must use http or https, not '{}'",
            raw,
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ScanJobError::detect_configuration(format!(
            "'{}' has no host",
            raw
        )));
    }
    Ok(url)
}
