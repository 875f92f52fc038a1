//! TLS policy for origin connections.
//!
//! Plain HTTP origins get a connector with an empty root store; it is never
//! used for a handshake since every outbound URI carries the `http` scheme.

use crate::config::{OriginConfig, OriginProtocol};
use anyhow::Context;
use hyper_rustls::ConfigBuilderExt;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore};
use std::sync::Arc;
use tracing::warn;

/// Client TLS configuration for the configured origin.
pub fn origin_tls_config(origin: &OriginConfig) -> Result<ClientConfig, anyhow::Error> {
    let config = match origin.protocol {
        OriginProtocol::Http => ClientConfig::builder()
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth(),
        OriginProtocol::Https if origin.tls_skip_verify => {
            warn!(
                "TLS certificate verification DISABLED for origin {} (development/testing only)",
                origin.host
            );
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier::new()))
                .with_no_client_auth()
        }
        OriginProtocol::Https => ClientConfig::builder()
            .with_native_roots()
            .context("Failed to load native root certificates")?
            .with_no_client_auth(),
    };
    Ok(config)
}

/// Accepts any server certificate. Only reachable through `tls_skip_verify`.
#[derive(Debug)]
pub struct NoVerifier {
    schemes: Vec<rustls::SignatureScheme>,
}

impl NoVerifier {
    pub fn new() -> Self {
        Self {
            schemes: rustls::crypto::ring::default_provider()
                .signature_verification_algorithms
                .supported_schemes(),
        }
    }
}

impl Default for NoVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.schemes.clone()
    }
}
