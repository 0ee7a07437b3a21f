//! Transport to the mail host: one TCP socket wrapped in rustls.
//!
//! Certificates are checked against the bundled webpki roots. The client
//! configuration is built on first use and shared by every sync run in the
//! process.

use crate::error::{Error, Result};
use rustls::{ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use std::sync::{Arc, LazyLock};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument};
use webpki_roots::TLS_SERVER_ROOTS;

/// TLS-wrapped socket an IMAP session runs over.
pub(crate) type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

static CLIENT_CONFIG: LazyLock<Arc<ClientConfig>> = LazyLock::new(|| {
    let mut trusted = RootCertStore::empty();
    trusted.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|anchor| {
        OwnedTrustAnchor::from_subject_spki_name_constraints(
            anchor.subject,
            anchor.spki,
            anchor.name_constraints,
        )
    }));

    Arc::new(
        ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(trusted)
            .with_no_client_auth(),
    )
});

/// Opens `target_addr` and completes the handshake, presenting `imap_host` as SNI.
///
/// A host that is not a valid DNS name fails with [`Error::InvalidDnsName`]
/// before any socket is opened.
#[instrument(
    name = "connection::establish_tls",
    skip_all,
    fields(imap_host = %imap_host, target_addr = %target_addr)
)]
pub(crate) async fn establish_tls_connection(
    imap_host: &str,
    target_addr: &str,
) -> Result<TlsStream> {
    let sni = server_name(imap_host)?;

    let socket = TcpStream::connect(target_addr)
        .await
        .map_err(|source| Error::TcpConnect {
            target: target_addr.to_string(),
            source,
        })?;

    debug!("Socket open, starting TLS");

    let stream = TlsConnector::from(Arc::clone(&CLIENT_CONFIG))
        .connect(sni, socket)
        .await
        .map_err(|source| Error::TlsConnect {
            target: target_addr.to_string(),
            source,
        })?;

    debug!("TLS session established");
    Ok(stream)
}

fn server_name(host: &str) -> Result<ServerName> {
    ServerName::try_from(host).map_err(|source| Error::InvalidDnsName {
        host: host.to_string(),
        source,
    })
}
