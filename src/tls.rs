use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use rustls::pki_types::pem::PemObject;
use tracing::warn;

use crate::error::Error;

/// Where trust anchors come from when no custom rustls config is supplied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TlsRootStore {
    /// Mozilla roots bundled through `webpki-roots`.
    #[default]
    WebPki,
    /// The operating system's certificate store.
    System,
    /// Only the certificates added with [`TlsConfig::with_root_pem`] or
    /// [`TlsConfig::with_root_der`].
    Specific,
}

#[derive(Clone, Debug)]
enum RootCertificate {
    Pem(Vec<u8>),
    Der(Vec<u8>),
}

/// TLS parameters handed to the pooling client. Certificate validation itself
/// is rustls' job; this type only decides which roots or which prepared
/// `ClientConfig` it runs with.
#[derive(Clone, Debug, Default)]
pub struct TlsConfig {
    root_store: TlsRootStore,
    root_certificates: Vec<RootCertificate>,
    client_config: Option<Arc<rustls::ClientConfig>>,
}

impl TlsConfig {
    /// Use a fully prepared rustls config as-is. Root store settings are ignored.
    pub fn custom(client_config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            client_config: Some(client_config),
            ..Self::default()
        }
    }

    pub fn with_root_store(mut self, root_store: TlsRootStore) -> Self {
        self.root_store = root_store;
        self
    }

    pub fn with_root_pem(mut self, certificate_pem: impl Into<Vec<u8>>) -> Self {
        self.root_certificates
            .push(RootCertificate::Pem(certificate_pem.into()));
        self
    }

    pub fn with_root_der(mut self, certificate_der: impl Into<Vec<u8>>) -> Self {
        self.root_certificates
            .push(RootCertificate::Der(certificate_der.into()));
        self
    }

    pub fn root_store(&self) -> TlsRootStore {
        self.root_store
    }

    pub(crate) fn build_client_config(&self) -> Result<rustls::ClientConfig, Error> {
        if let Some(client_config) = &self.client_config {
            // ALPN is negotiated by the connector builder.
            let mut config = client_config.as_ref().clone();
            config.alpn_protocols.clear();
            return Ok(config);
        }

        let root_store = self.build_root_store()?;
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|source| tls_config_error(source.to_string()))?
            .with_root_certificates(root_store)
            .with_no_client_auth();
        Ok(config)
    }

    fn build_root_store(&self) -> Result<rustls::RootCertStore, Error> {
        if !self.root_certificates.is_empty() && self.root_store != TlsRootStore::Specific {
            return Err(tls_config_error(
                "custom root CAs require TlsRootStore::Specific",
            ));
        }

        match self.root_store {
            TlsRootStore::WebPki => Ok(rustls::RootCertStore::from_iter(
                webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
            )),
            TlsRootStore::System => {
                let loaded = rustls_native_certs::load_native_certs();
                if !loaded.errors.is_empty() {
                    warn!(
                        error_count = loaded.errors.len(),
                        "system root certificate loading returned partial errors"
                    );
                }
                let mut root_store = rustls::RootCertStore::empty();
                let (added, _ignored) = root_store.add_parsable_certificates(loaded.certs);
                if added == 0 {
                    return Err(tls_config_error("failed to load system root certificates"));
                }
                Ok(root_store)
            }
            TlsRootStore::Specific => {
                if self.root_certificates.is_empty() {
                    return Err(tls_config_error(
                        "TlsRootStore::Specific requires at least one root CA",
                    ));
                }
                let mut root_store = rustls::RootCertStore::empty();
                for certificate in &self.root_certificates {
                    add_root_certificate(&mut root_store, certificate)?;
                }
                Ok(root_store)
            }
        }
    }
}

fn add_root_certificate(
    root_store: &mut rustls::RootCertStore,
    certificate: &RootCertificate,
) -> Result<(), Error> {
    match certificate {
        RootCertificate::Pem(pem) => {
            let mut parsed = Vec::new();
            for item in CertificateDer::pem_slice_iter(pem) {
                let certificate = item.map_err(|source| {
                    tls_config_error(format!("failed to parse PEM root certificate: {source}"))
                })?;
                parsed.push(certificate);
            }
            if parsed.is_empty() {
                return Err(tls_config_error(
                    "no certificate blocks found in PEM root certificate",
                ));
            }
            let (added, _ignored) = root_store.add_parsable_certificates(parsed);
            if added == 0 {
                return Err(tls_config_error("failed to parse PEM root certificate(s)"));
            }
        }
        RootCertificate::Der(der) => {
            root_store
                .add(CertificateDer::from(der.clone()))
                .map_err(|source| {
                    tls_config_error(format!("failed to add DER root certificate: {source}"))
                })?;
        }
    }
    Ok(())
}

fn tls_config_error(message: impl Into<String>) -> Error {
    Error::TlsConfig {
        message: message.into(),
    }
}
