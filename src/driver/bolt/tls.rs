//! TLS client configuration.
//!
//! Every trust strategy goes through one verifier so that a custom trust
//! callback sees both the presented chain and whatever the standard WebPKI
//! validation concluded about it.

use std::fmt;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tracing::warn;

use crate::bolt::BoltError;
use crate::driver::config::{TrustCallback, TrustStrategy};

enum Decision {
    /// Standard validation result stands
    Verify,
    /// Accept anything with a valid handshake signature
    AcceptAll,
    Callback(TrustCallback),
}

struct TrustVerifier {
    inner: Option<Arc<WebPkiServerVerifier>>,
    decision: Decision,
    provider: Arc<CryptoProvider>,
}

impl fmt::Debug for TrustVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decision = match self.decision {
            Decision::Verify => "verify",
            Decision::AcceptAll => "accept-all",
            Decision::Callback(_) => "callback",
        };
        f.debug_struct("TrustVerifier").field("decision", &decision).finish()
    }
}

impl ServerCertVerifier for TrustVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let validation_error = match &self.inner {
            Some(inner) => inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
                .err(),
            None => None,
        };

        match &self.decision {
            Decision::Verify => match validation_error {
                None => Ok(ServerCertVerified::assertion()),
                Some(err) => Err(err),
            },
            Decision::AcceptAll => Ok(ServerCertVerified::assertion()),
            Decision::Callback(callback) => {
                let chain: Vec<CertificateDer<'static>> = std::iter::once(end_entity)
                    .chain(intermediates.iter())
                    .map(|c| c.clone().into_owned())
                    .collect();
                if callback(&chain, validation_error.as_ref()) {
                    Ok(ServerCertVerified::assertion())
                } else {
                    Err(rustls::Error::General(
                        "Server certificate was rejected by the trust callback".to_string(),
                    ))
                }
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

fn system_roots() -> Result<RootCertStore, BoltError> {
    let result = rustls_native_certs::load_native_certs();
    let mut store = RootCertStore::empty();
    let (added, _ignored) = store.add_parsable_certificates(result.certs);
    if !result.errors.is_empty() {
        warn!("Some system root certificates could not be loaded: {} errors", result.errors.len());
    }
    if added == 0 {
        return Err(BoltError::Security(
            "Failed to load any system root certificates".to_string(),
        ));
    }
    Ok(store)
}

fn custom_roots(certificates: &[Vec<u8>]) -> Result<RootCertStore, BoltError> {
    let mut store = RootCertStore::empty();
    let (added, _ignored) = store.add_parsable_certificates(
        certificates.iter().map(|der| CertificateDer::from(der.clone())),
    );
    if added == 0 {
        return Err(BoltError::Security("No valid custom CA certificates".to_string()));
    }
    Ok(store)
}

fn webpki(roots: RootCertStore, provider: &Arc<CryptoProvider>) -> Result<Arc<WebPkiServerVerifier>, BoltError> {
    WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .map_err(|e| BoltError::Security(format!("Invalid trust roots: {}", e)))
}

/// Build the rustls client configuration for a trust strategy.
pub fn client_config(strategy: &TrustStrategy) -> Result<Arc<ClientConfig>, BoltError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    let (inner, decision) = match strategy {
        TrustStrategy::TrustSystemCas => (Some(webpki(system_roots()?, &provider)?), Decision::Verify),
        TrustStrategy::TrustCustomCas { certificates } => {
            (Some(webpki(custom_roots(certificates)?, &provider)?), Decision::Verify)
        }
        TrustStrategy::TrustAllCertificates => (None, Decision::AcceptAll),
        TrustStrategy::Custom(callback) => (
            Some(webpki(system_roots()?, &provider)?),
            Decision::Callback(callback.clone()),
        ),
    };

    let verifier = Arc::new(TrustVerifier {
        inner,
        decision,
        provider: provider.clone(),
    });

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| BoltError::Security(format!("TLS configuration failed: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// SNI name for a host.
pub fn server_name(host: &str) -> Result<ServerName<'static>, BoltError> {
    ServerName::try_from(host.trim_end_matches('.').to_string())
        .map_err(|_| BoltError::Security(format!("Invalid hostname for TLS: {}", host)))
}
