//! HTTP client for the Vault sys API

use async_trait::async_trait;
use reqwest::{header, Certificate, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::traits::{ConnectOptions, NodeClient, NodeConnector, NodeStatus, SealStatus};
use crate::config::HostRef;
use crate::types::{Result, UnsealerError};

/// Client bound to one Vault node
#[derive(Debug, Clone)]
pub struct VaultClient {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SealStatusResponse {
    sealed: bool,
    /// Absent on old Vault releases; `sys/init` is asked instead
    #[serde(default)]
    initialized: Option<bool>,
    #[serde(rename = "t")]
    threshold: u32,
    progress: u32,
}

#[derive(Debug, Deserialize)]
struct InitStatusResponse {
    initialized: bool,
}

#[derive(Serialize)]
struct UnsealRequest<'a> {
    key: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

impl VaultClient {
    /// Build a client for `host` trusting `roots` on top of the system store
    pub fn new(host: &HostRef, options: &ConnectOptions, roots: &[Certificate]) -> Result<Self> {
        let builder = roots
            .iter()
            .cloned()
            .fold(Client::builder().timeout(options.timeout), |builder, cert| {
                builder.add_root_certificate(cert)
            });

        let client = builder
            .build()
            .map_err(|e| UnsealerError::Tls(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: format!("{}://{}:{}", options.protocol.scheme(), host.name, host.port),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn seal_status(&self) -> Result<SealStatusResponse> {
        let url = format!("{}/v1/sys/seal-status", self.base_url);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    async fn init_status(&self) -> Result<InitStatusResponse> {
        let url = format!("{}/v1/sys/init", self.base_url);
        let response = self.client.get(&url).send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UnsealerError::Vault {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        let body = response.json().await?;
        Ok(body)
    }
}

/// Vault reports failures as `{"errors": [...]}`; fall back to the raw body
fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        _ if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl NodeClient for VaultClient {
    async fn status(&self) -> Result<NodeStatus> {
        let seal = self.seal_status().await?;
        let initialized = match seal.initialized {
            Some(initialized) => initialized,
            None => self.init_status().await?.initialized,
        };

        debug!(
            url = %self.base_url,
            initialized,
            sealed = seal.sealed,
            "Fetched node status"
        );

        Ok(NodeStatus {
            initialized,
            sealed: seal.sealed,
            progress: seal.progress,
            threshold: seal.threshold,
        })
    }

    async fn unseal(&self, key_share: &str) -> Result<SealStatus> {
        let url = format!("{}/v1/sys/unseal", self.base_url);
        let response = self
            .client
            .put(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&UnsealRequest { key: key_share })
            .send()
            .await?;

        let seal: SealStatusResponse = self.handle_response(response).await?;
        Ok(SealStatus {
            sealed: seal.sealed,
            progress: seal.progress,
            threshold: seal.threshold,
        })
    }
}

/// Extra trust roots, read from disk once per run
#[derive(Clone, Default)]
pub enum CaBundle {
    /// System roots only
    #[default]
    System,
    Certificates(Arc<[Certificate]>),
    /// The bundle could not be used; every connection fails with this cause
    Invalid(String),
}

impl CaBundle {
    /// Read and parse the PEM bundle at `path`, if any
    pub async fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::System;
        };
        match tokio::fs::read(path).await {
            Ok(pem) => Self::parse(&pem, path),
            Err(e) => Self::Invalid(format!("cannot read CA bundle {}: {}", path.display(), e)),
        }
    }

    fn parse(pem: &[u8], path: &Path) -> Self {
        match Certificate::from_pem_bundle(pem) {
            Ok(certs) if certs.is_empty() => Self::Invalid(format!(
                "CA bundle {} contains no certificates",
                path.display()
            )),
            Ok(certs) => Self::Certificates(certs.into()),
            Err(e) => Self::Invalid(format!("invalid CA bundle {}: {}", path.display(), e)),
        }
    }

    fn roots(&self) -> Result<&[Certificate]> {
        match self {
            Self::System => Ok(&[]),
            Self::Certificates(certs) => Ok(&certs[..]),
            Self::Invalid(cause) => Err(UnsealerError::Tls(cause.clone())),
        }
    }
}

impl fmt::Debug for CaBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str("System"),
            Self::Certificates(certs) => write!(f, "Certificates({})", certs.len()),
            Self::Invalid(cause) => f.debug_tuple("Invalid").field(cause).finish(),
        }
    }
}

/// Connector producing [`VaultClient`]s
#[derive(Debug, Clone, Default)]
pub struct VaultConnector {
    ca: CaBundle,
}

impl VaultConnector {
    pub fn new(ca: CaBundle) -> Self {
        Self { ca }
    }

    /// Connector trusting the bundle named by `options.ca_path`
    pub async fn load(options: &ConnectOptions) -> Self {
        Self::new(CaBundle::load(options.ca_path.as_deref()).await)
    }
}

impl NodeConnector for VaultConnector {
    type Client = VaultClient;

    fn connect(&self, host: &HostRef, options: &ConnectOptions) -> Result<VaultClient> {
        VaultClient::new(host, options, self.ca.roots()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use std::io::Write;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_CA: &str = "-----BEGIN CERTIFICATE-----
MIIBmDCCAT+gAwIBAgIUIlbp6gBjpwy0splHpcbPI/gUhawwCgYIKoZIzj0EAwIw
ITEfMB0GA1UEAwwWdmF1bHQtdW5zZWFsZXItdGVzdC1jYTAgFw0yNjEwMTkwNTIy
MDRaGA8yMTI2MDkyNTA1MjIwNFowITEfMB0GA1UEAwwWdmF1bHQtdW5zZWFsZXIt
dGVzdC1jYTBZMBMGByqGSM49AgEGCCqGSM49AwEHA0IABAmWxTJOOrTuvUWgbuFU
m3IOvl3M+SUlUTTj7jqqubqCcgBUFGjRvOSVyEfm0zVDr8Q2+dQ4/K5P6C+zAbfj
k2yjUzBRMB0GA1UdDgQWBBRyuX47+89bb4MmFVh4EFueGph+aDAfBgNVHSMEGDAW
gBRyuX47+89bb4MmFVh4EFueGph+aDAPBgNVHRMBAf8EBTADAQH/MAoGCCqGSM49
BAMCA0cAMEQCICcWmN9TPuq3nH8OaKag2uYPshggmwhplk7ECQ2VnGVjAiAqWIQr
uzskWOJEBlOYxfxGDXRErcngEyC7TbMX0douGg==
-----END CERTIFICATE-----\n";

    fn client_for(server: &MockServer) -> VaultClient {
        let addr = server.address();
        let host = HostRef::new(addr.ip().to_string(), addr.port());
        let options = ConnectOptions {
            protocol: Protocol::Http,
            ..Default::default()
        };
        VaultClient::new(&host, &options, &[]).unwrap()
    }

    #[test]
    fn test_base_url() {
        let client = VaultClient::new(
            &HostRef::new("vault-1.dc1", 8200),
            &ConnectOptions::default(),
            &[],
        )
        .unwrap();
        assert_eq!(client.base_url(), "https://vault-1.dc1:8200");
    }

    fn bundle_file(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file
    }

    fn connect_with(ca: CaBundle) -> Result<VaultClient> {
        VaultConnector::new(ca).connect(&HostRef::new("vault-1", 8200), &ConnectOptions::default())
    }

    #[tokio::test]
    async fn test_missing_ca_bundle_is_tls_error() {
        let ca = CaBundle::load(Some(Path::new("/nonexistent/ca.pem"))).await;
        assert!(matches!(ca, CaBundle::Invalid(_)));
        assert!(matches!(connect_with(ca), Err(UnsealerError::Tls(_))));
    }

    #[tokio::test]
    async fn test_garbage_ca_bundle_is_tls_error() {
        let file = bundle_file(b"not a certificate");
        let ca = CaBundle::load(Some(file.path())).await;

        match connect_with(ca) {
            Err(UnsealerError::Tls(cause)) => assert!(cause.contains("contains no certificates")),
            other => panic!("unexpected connect result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_pem_bundle_adds_roots() {
        let file = bundle_file(TEST_CA.as_bytes());
        let ca = CaBundle::load(Some(file.path())).await;

        assert!(matches!(&ca, CaBundle::Certificates(certs) if certs.len() == 1));
        assert!(connect_with(ca).is_ok());
    }

    #[tokio::test]
    async fn test_no_ca_path_uses_system_roots() {
        let ca = CaBundle::load(None).await;
        assert!(matches!(ca, CaBundle::System));
        assert!(connect_with(ca).is_ok());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(
                StatusCode::BAD_REQUEST,
                r#"{"errors":["invalid key","try again"]}"#
            ),
            "invalid key; try again"
        );
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, "upstream down\n"), "upstream down");
        assert_eq!(error_message(StatusCode::SERVICE_UNAVAILABLE, ""), "Service Unavailable");
    }

    #[tokio::test]
    async fn test_status_reads_seal_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/seal-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "type": "shamir",
                "initialized": true,
                "sealed": true,
                "t": 3,
                "n": 5,
                "progress": 1
            })))
            .mount(&server)
            .await;

        let status = client_for(&server).status().await.unwrap();
        assert_eq!(
            status,
            NodeStatus {
                initialized: true,
                sealed: true,
                progress: 1,
                threshold: 3,
            }
        );
    }

    #[tokio::test]
    async fn test_status_falls_back_to_init_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/seal-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sealed": true,
                "t": 2,
                "n": 3,
                "progress": 0
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/sys/init"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"initialized": false})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let status = client_for(&server).status().await.unwrap();
        assert!(!status.initialized);
        assert!(status.sealed);
    }

    #[tokio::test]
    async fn test_unseal_submits_key() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/sys/unseal"))
            .and(body_json(serde_json::json!({"key": "share-one"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sealed": false,
                "t": 1,
                "n": 1,
                "progress": 0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let seal = client_for(&server).unseal("share-one").await.unwrap();
        assert_eq!(
            seal,
            SealStatus {
                sealed: false,
                progress: 0,
                threshold: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_unseal_surfaces_vault_errors() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/sys/unseal"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"errors": ["invalid key"]})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server).unseal("bogus").await.unwrap_err();
        match err {
            UnsealerError::Vault { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
