//! gNMI channel setup
//!
//! Three modes: plaintext, verified TLS through tonic's rustls stack, and
//! TLS without certificate verification. The last one is used whenever a
//! service account token is configured, since CloudVision is commonly
//! deployed with a self-signed certificate.

use std::io;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::{
    self, CryptoProvider, verify_tls12_signature, verify_tls13_signature,
};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tonic::metadata::{Ascii, MetadataValue};
use tonic::service::Interceptor;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity, Uri};
use tonic::{Request, Status};
use tracing::{debug, warn};

use crate::config::{CloudVisionSettings, TlsConfig};
use crate::error::{ConfigError, TransportError};
use crate::gnmi::g_nmi_client::GNmiClient;

/// Authenticated gNMI client.
pub type GnmiClient = GNmiClient<InterceptedService<Channel, BearerAuth>>;

/// Attaches `authorization: Bearer <token>` to every request.
#[derive(Debug, Clone, Default)]
pub struct BearerAuth {
    header: Option<MetadataValue<Ascii>>,
}

impl BearerAuth {
    pub fn new(token: Option<&str>) -> Result<Self, ConfigError> {
        let header = token
            .map(|t| MetadataValue::try_from(format!("Bearer {}", t)))
            .transpose()
            .map_err(|_| ConfigError::InvalidToken)?;
        Ok(Self { header })
    }
}

impl Interceptor for BearerAuth {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(header) = &self.header {
            request.metadata_mut().insert("authorization", header.clone());
        }
        Ok(request)
    }
}

#[derive(Clone)]
enum TlsMode {
    Plaintext,
    Verified(ClientTlsConfig),
    Insecure {
        config: Arc<ClientConfig>,
        server_name: Option<ServerName<'static>>,
    },
}

/// Connection settings for one CloudVision address, shared by all targets.
#[derive(Clone)]
pub struct Transport {
    address: String,
    tls: TlsMode,
    auth: BearerAuth,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.tls {
            TlsMode::Plaintext => "plaintext",
            TlsMode::Verified(_) => "tls",
            TlsMode::Insecure { .. } => "tls-insecure",
        };
        f.debug_struct("Transport")
            .field("address", &self.address)
            .field("tls", &mode)
            .finish()
    }
}

impl Transport {
    /// Build the transport, loading certificate files.
    pub fn from_settings(settings: &CloudVisionSettings) -> Result<Self, ConfigError> {
        let token = settings.token();
        if token.is_some() && settings.tls.has_client_cert() {
            return Err(ConfigError::TokenWithClientCert);
        }

        let tls = if token.is_some() || (settings.enable_tls && settings.tls.insecure_skip_verify)
        {
            warn!(address = %settings.address, "TLS certificate verification disabled");
            TlsMode::Insecure {
                config: Arc::new(insecure_client_config(&settings.tls)?),
                server_name: settings
                    .tls
                    .server_name
                    .as_deref()
                    .map(server_name)
                    .transpose()?,
            }
        } else if settings.enable_tls {
            TlsMode::Verified(verified_client_config(&settings.tls)?)
        } else {
            TlsMode::Plaintext
        };

        Ok(Self {
            address: settings.address.clone(),
            tls,
            auth: BearerAuth::new(token)?,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self.tls, TlsMode::Plaintext)
    }

    /// Dial the address and wrap the channel in an authenticated client.
    pub async fn connect(&self) -> Result<GnmiClient, TransportError> {
        let dial_error = |source| TransportError::Dial {
            address: self.address.clone(),
            source,
        };

        let channel = match &self.tls {
            TlsMode::Plaintext => self.endpoint("http")?.connect().await.map_err(dial_error)?,
            TlsMode::Verified(tls) => self
                .endpoint("https")?
                .tls_config(tls.clone())
                .map_err(|source| TransportError::Endpoint {
                    address: self.address.clone(),
                    source,
                })?
                .connect()
                .await
                .map_err(dial_error)?,
            TlsMode::Insecure {
                config,
                server_name,
            } => {
                // TLS is set up by the connector, so tonic sees a plain URI.
                let connector = TlsConnector::from(config.clone());
                let server_name = server_name.clone();
                self.endpoint("http")?
                    .connect_with_connector(tower::service_fn(move |uri: Uri| {
                        connect_tls(connector.clone(), server_name.clone(), uri)
                    }))
                    .await
                    .map_err(dial_error)?
            }
        };

        debug!(address = %self.address, "gNMI channel connected");
        Ok(GNmiClient::with_interceptor(channel, self.auth.clone()))
    }

    fn endpoint(&self, scheme: &str) -> Result<Endpoint, TransportError> {
        Endpoint::from_shared(format!("{}://{}", scheme, self.address)).map_err(|source| {
            TransportError::Endpoint {
                address: self.address.clone(),
                source,
            }
        })
    }
}

async fn connect_tls(
    connector: TlsConnector,
    server_name: Option<ServerName<'static>>,
    uri: Uri,
) -> io::Result<hyper_util::rt::TokioIo<tokio_rustls::client::TlsStream<TcpStream>>> {
    let host = uri
        .host()
        .unwrap_or_default()
        .trim_matches(['[', ']'])
        .to_string();
    let port = uri.port_u16().unwrap_or(443);

    let tcp = TcpStream::connect((host.as_str(), port)).await?;
    let name = match server_name {
        Some(name) => name,
        None => ServerName::try_from(host)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
    };

    let tls = connector.connect(name, tcp).await?;
    Ok(hyper_util::rt::TokioIo::new(tls))
}

fn server_name(name: &str) -> Result<ServerName<'static>, ConfigError> {
    ServerName::try_from(name.to_string())
        .map_err(|e| ConfigError::Tls(format!("invalid server name {}: {}", name, e)))
}

fn read_file(path: &str) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|e| ConfigError::Tls(format!("cannot read {}: {}", path, e)))
}

fn verified_client_config(tls: &TlsConfig) -> Result<ClientTlsConfig, ConfigError> {
    let mut config = ClientTlsConfig::new().with_native_roots();

    if let Some(ca) = &tls.ca_cert {
        config = config.ca_certificate(Certificate::from_pem(read_file(ca)?));
    }

    if let (Some(cert), Some(key)) = (&tls.client_cert, &tls.client_key) {
        config = config.identity(Identity::from_pem(read_file(cert)?, read_file(key)?));
    }

    if let Some(name) = &tls.server_name {
        config = config.domain_name(name.clone());
    }

    Ok(config)
}

fn insecure_client_config(tls: &TlsConfig) -> Result<ClientConfig, ConfigError> {
    let provider = Arc::new(crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| ConfigError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)));

    let mut config = match (&tls.client_cert, &tls.client_key) {
        (Some(cert), Some(key)) => {
            let certs = load_certs(cert)?;
            let key = load_key(key)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ConfigError::Tls(e.to_string()))?
        }
        _ => builder.with_no_client_auth(),
    };

    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(config)
}

fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let pem = read_file(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("invalid certificate {}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(ConfigError::Tls(format!("no certificate found in {}", path)));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let pem = read_file(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(|e| ConfigError::Tls(format!("invalid private key {}: {}", path, e)))?
        .ok_or_else(|| ConfigError::Tls(format!("no private key found in {}", path)))
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct NoVerifier(Arc<CryptoProvider>);

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
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
