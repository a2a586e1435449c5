//! TLS configuration, handshakes and peer identity.
//!
//! # Responsibilities
//! - Load PEM certificates and keys from disk
//! - Build a rustls server config with the configured client-auth mode
//! - Run a server-side handshake bounded by a timeout and by shutdown
//! - Extract the peer identity (CommonName + DNS SANs) from a client certificate

use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use x509_parser::extensions::GeneralName;

use crate::config::{ClientAuthMode, TlsConfig};
use crate::lifecycle::ShutdownSignal;

/// Errors building a TLS configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("client_auth = {0:?} requires client_ca_path")]
    MissingClientCa(ClientAuthMode),

    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("invalid client verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
}

/// A server-side TLS handshake failed.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("TLS handshake failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("TLS handshake abandoned on shutdown")]
    Cancelled,
}

/// Load every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let read_err = |source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(read_err)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let read_err = |source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(read_err)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(read_err)?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Build a rustls server configuration.
pub fn build_server_config(config: &TlsConfig) -> Result<Arc<ServerConfig>, TlsError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?;

    let builder = match config.client_auth {
        ClientAuthMode::None => builder.with_no_client_auth(),
        mode => {
            let ca_path = config
                .client_ca_path
                .as_deref()
                .ok_or(TlsError::MissingClientCa(mode))?;

            let mut roots = RootCertStore::empty();
            for ca in load_certs(ca_path)? {
                roots.add(ca)?;
            }

            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if mode == ClientAuthMode::Optional {
                verifier.allow_unauthenticated().build()?
            } else {
                verifier.build()?
            };
            builder.with_client_cert_verifier(verifier)
        }
    };

    let certs = load_certs(&config.cert_path)?;
    let key = load_private_key(&config.key_path)?;
    let server_config = builder.with_single_cert(certs, key)?;

    tracing::debug!(
        cert = %config.cert_path.display(),
        client_auth = ?config.client_auth,
        "TLS server config built"
    );
    Ok(Arc::new(server_config))
}

/// Run the server side of a TLS handshake.
///
/// A zero `timeout` leaves the handshake unbounded; shutdown always abandons it.
pub async fn accept<S>(
    acceptor: &TlsAcceptor,
    stream: S,
    timeout: Duration,
    shutdown: &ShutdownSignal,
) -> Result<TlsStream<S>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handshake = acceptor.accept(stream);
    let bounded = async {
        if timeout.is_zero() {
            handshake.await.map_err(HandshakeError::Io)
        } else {
            match tokio::time::timeout(timeout, handshake).await {
                Ok(res) => res.map_err(HandshakeError::Io),
                Err(_) => Err(HandshakeError::Timeout(timeout)),
            }
        }
    };

    tokio::select! {
        res = bounded => res,
        _ = shutdown.cancelled() => Err(HandshakeError::Cancelled),
    }
}

/// Identity of the peer leaf certificate: its CommonName plus every DNS SAN.
///
/// Empty when there is no certificate or it carries neither.
pub fn peer_names(certs: &[CertificateDer<'_>]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let Some(leaf) = certs.first() else {
        return names;
    };

    let cert = match x509_parser::parse_x509_certificate(leaf.as_ref()) {
        Ok((_, cert)) => cert,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable peer certificate");
            return names;
        }
    };

    if let Some(cn) = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
    {
        if !cn.is_empty() {
            names.insert(cn.to_string());
        }
    }

    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                names.insert(dns.to_string());
            }
        }
    }

    names
}
