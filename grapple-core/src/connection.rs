//! # Connection
//!
//! Builds the `tonic` [`Channel`] shared by schema discovery and the RPC itself.
//!
//! Shorthand targets (see [`crate::target`]) and `insecure` connections use plaintext
//! HTTP/2. Everything else uses TLS with the platform's native roots, extra root CAs, an
//! optional server name override and an optional client identity for mutual TLS.
use crate::target::resolve_target;
use std::path::{Path, PathBuf};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

/// Reported by `h2` when a TLS server answers the plaintext HTTP/2 preface with a TLS alert,
/// whose first bytes read as an oversized frame header.
const FRAME_SIZE_MARKERS: [&str; 2] = ["frame with invalid size", "FRAME_SIZE_ERROR"];
/// Reported when the server hangs up before the HTTP/2 handshake completes.
const EARLY_CLOSE: &str = "connection closed";
/// Returned by the TLS stack when the peer answers the handshake with non-TLS bytes.
const TLS_CONTENT_MISMATCH: &str = "InvalidContentType";

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("Invalid URL '{0}'")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Invalid user agent '{0}'")]
    InvalidUserAgent(String, #[source] tonic::transport::Error),
    #[error("Failed to connect to '{0}'")]
    ConnectionFailed(String, #[source] tonic::transport::Error),
    #[error("Invalid TLS configuration")]
    Tls(#[source] tonic::transport::Error),
    #[error("Failed to read '{path}'")]
    ReadPem {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(
        "--client-cert and --client-key must be passed an equal number of times \
         ({certs} certs, {keys} keys)"
    )]
    ClientIdentityMismatch { certs: usize, keys: usize },
    #[error("Only one client certificate/key pair is supported, got {0}")]
    MultipleClientIdentities(usize),
}

/// Transport security settings, validated even when the connection ends up in plaintext.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM files with extra root certificates.
    pub root_cas: Vec<PathBuf>,
    /// Overrides the name used to verify the server certificate.
    pub server_name: Option<String>,
    pub client_certs: Vec<PathBuf>,
    pub client_keys: Vec<PathBuf>,
}

impl TlsOptions {
    fn client_tls_config(&self) -> Result<ClientTlsConfig, ConnectError> {
        if self.client_certs.len() != self.client_keys.len() {
            return Err(ConnectError::ClientIdentityMismatch {
                certs: self.client_certs.len(),
                keys: self.client_keys.len(),
            });
        }
        if self.client_certs.len() > 1 {
            return Err(ConnectError::MultipleClientIdentities(self.client_certs.len()));
        }

        let mut config = ClientTlsConfig::new().with_native_roots();

        for path in &self.root_cas {
            config = config.ca_certificate(Certificate::from_pem(read_pem(path)?));
        }

        if let Some(name) = &self.server_name {
            config = config.domain_name(name.clone());
        }

        if let (Some(cert), Some(key)) = (self.client_certs.first(), self.client_keys.first()) {
            config = config.identity(Identity::from_pem(read_pem(cert)?, read_pem(key)?));
        }

        Ok(config)
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ConnectError> {
    std::fs::read(path).map_err(|source| ConnectError::ReadPem {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Target as typed by the user: shorthand, `host:port` or a full `http(s)://` URL.
    pub target: String,
    /// Disables TLS.
    pub insecure: bool,
    /// Prepended to tonic's own `user-agent` value.
    pub user_agent: Option<String>,
    pub tls: TlsOptions,
}

impl ConnectOptions {
    /// Whether the connection goes without transport security.
    pub fn plaintext(&self) -> bool {
        if let Some(scheme) = explicit_scheme(&self.target) {
            return scheme == "http";
        }
        self.insecure || resolve_target(&self.target).shorthand
    }

    /// The URI handed to `tonic`.
    pub fn uri(&self) -> String {
        if explicit_scheme(&self.target).is_some() {
            return self.target.clone();
        }

        let address = resolve_target(&self.target).address;
        let scheme = if self.plaintext() { "http" } else { "https" };
        format!("{scheme}://{address}")
    }

    /// Connects to the target.
    pub async fn connect(&self) -> Result<Channel, ConnectError> {
        let tls = self.tls.client_tls_config()?;
        let uri = self.uri();

        let mut endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| ConnectError::InvalidUrl(uri.clone(), e))?;

        if !self.plaintext() {
            endpoint = endpoint.tls_config(tls).map_err(ConnectError::Tls)?;
        }

        if let Some(user_agent) = &self.user_agent {
            endpoint = endpoint
                .user_agent(user_agent.clone())
                .map_err(|e| ConnectError::InvalidUserAgent(user_agent.clone(), e))?;
        }

        tracing::debug!(%uri, plaintext = self.plaintext(), "connecting");

        endpoint
            .connect()
            .await
            .map_err(|e| ConnectError::ConnectionFailed(uri, e))
    }
}

fn explicit_scheme(target: &str) -> Option<&str> {
    target
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .filter(|scheme| *scheme == "http" || *scheme == "https")
}

/// Suggests a cause for two well-known transport failures, given the full error text.
///
/// The hint is meant to be appended to the original error, never to replace it.
pub fn transport_hint(error_text: &str, plaintext: bool) -> Option<&'static str> {
    if error_text.contains(TLS_CONTENT_MISMATCH) {
        return Some("is the server expecting plaintext?");
    }

    let frame_size = FRAME_SIZE_MARKERS
        .iter()
        .any(|marker| error_text.contains(marker));

    if frame_size || error_text.contains(EARLY_CLOSE) {
        return Some(if plaintext {
            "is the server expecting TLS?"
        } else {
            "is the server expecting mutual TLS?"
        });
    }

    None
}

/// Appends the [`transport_hint`], if any, to an error message.
pub fn annotate_transport_error(error_text: String, plaintext: bool) -> String {
    match transport_hint(&error_text, plaintext) {
        Some(hint) => format!("{error_text} ({hint})"),
        None => error_text,
    }
}
