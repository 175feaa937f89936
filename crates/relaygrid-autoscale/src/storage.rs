//! Object-storage write probe.
//!
//! Startup refuses to run an autoscaler whose nodes could not upload their
//! results. [`S3Probe`] proves the credentials and bucket work by writing a
//! small object with an AWS Signature V4 signed `PUT`, then deleting it.
//!
//! Endpoints are addressed virtual-host style over TLS
//! (`https://{bucket}.{endpoint}/{key}`). An endpoint given as `http://...`
//! is addressed path style in plain text (`http://{endpoint}/{bucket}/{key}`),
//! which is how self-hosted S3 servers are usually reached.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::error::{AutoscaleError, AutoscaleResult};
use crate::provider::S3Config;

/// Default per-request timeout.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Checks that object storage accepts writes.
#[async_trait]
pub trait StorageProbe: Send + Sync {
    async fn check(&self, s3: &S3Config) -> AutoscaleResult<()>;
}

/// Signed-request S3 probe.
#[derive(Debug, Clone)]
pub struct S3Probe {
    timeout: Duration,
}

impl S3Probe {
    pub fn new() -> Self {
        Self {
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for S3Probe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageProbe for S3Probe {
    async fn check(&self, s3: &S3Config) -> AutoscaleResult<()> {
        let key = format!("relaygrid-probe-{}.txt", random_hex(6)?);
        let target = Target::new(s3, &key);
        let body = b"relaygrid storage check".to_vec();

        let status = self.send(s3, &target, "PUT", body).await?;
        if !(200..300).contains(&status) {
            return Err(AutoscaleError::Storage(format!(
                "PUT {} answered {status}",
                target.url()
            )));
        }
        debug!(url = %target.url(), "storage probe object written");

        // Leaving the probe object behind is harmless.
        match self.send(s3, &target, "DELETE", Vec::new()).await {
            Ok(status) if (200..300).contains(&status) => {}
            Ok(status) => warn!(url = %target.url(), status, "could not delete probe object"),
            Err(e) => warn!(url = %target.url(), error = %e, "could not delete probe object"),
        }
        Ok(())
    }
}

impl S3Probe {
    async fn send(
        &self,
        s3: &S3Config,
        target: &Target,
        method: &str,
        body: Vec<u8>,
    ) -> AutoscaleResult<u16> {
        let now = chrono::Utc::now();
        let signed = sign(s3, target, method, &body, now)?;

        let fut = exchange(target, method, &signed, body);
        tokio::time::timeout(self.timeout, fut).await.map_err(|_| {
            AutoscaleError::Storage(format!(
                "{method} {} timed out after {}ms",
                target.url(),
                self.timeout.as_millis()
            ))
        })?
    }
}

async fn exchange(
    target: &Target,
    method: &str,
    signed: &SignedHeaders,
    body: Vec<u8>,
) -> AutoscaleResult<u16> {
    let stream = tokio::net::TcpStream::connect(&target.connect_addr)
        .await
        .map_err(|e| storage_err(&target.connect_addr, e))?;
    if !target.tls {
        return request(stream, target, method, signed, body).await;
    }

    let connector = tokio_rustls::TlsConnector::from(tls_config()?);
    let server_name = rustls::pki_types::ServerName::try_from(target.server_name.clone())
        .map_err(|e| storage_err(&target.server_name, e))?;
    let tls = connector
        .connect(server_name, stream)
        .await
        .map_err(|e| storage_err(&target.server_name, e))?;
    request(tls, target, method, signed, body).await
}

async fn request<S>(
    io: S,
    target: &Target,
    method: &str,
    signed: &SignedHeaders,
    body: Vec<u8>,
) -> AutoscaleResult<u16>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = hyper_util::rt::TokioIo::new(io);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| storage_err(&target.host, e))?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method(method)
        .uri(&target.path)
        .header("host", &target.host)
        .header("x-amz-date", &signed.amz_date)
        .header("x-amz-content-sha256", &signed.payload_hash)
        .header("authorization", &signed.authorization)
        .header("content-length", body.len())
        .body(Full::new(bytes::Bytes::from(body)))
        .map_err(|e| storage_err(&target.host, e))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| storage_err(&target.host, e))?;
    let status = resp.status().as_u16();
    // Drain so the connection closes cleanly.
    let _ = resp.into_body().collect().await;
    Ok(status)
}

fn tls_config() -> AutoscaleResult<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| AutoscaleError::Storage(format!("tls protocol version error: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

fn storage_err(what: &str, e: impl std::fmt::Display) -> AutoscaleError {
    AutoscaleError::Storage(format!("{what}: {e}"))
}

/// Random lowercase hex string of `bytes * 2` characters.
pub(crate) fn random_hex(bytes: usize) -> AutoscaleResult<String> {
    let mut buf = vec![0u8; bytes];
    getrandom::getrandom(&mut buf)
        .map_err(|e| AutoscaleError::Config(format!("random source unavailable: {e}")))?;
    Ok(hex::encode(buf))
}

// ── Addressing ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Target {
    tls: bool,
    /// Value of the `host` header.
    host: String,
    /// SNI name for TLS.
    server_name: String,
    /// `host:port` to dial.
    connect_addr: String,
    /// Absolute path of the object.
    path: String,
}

impl Target {
    fn new(s3: &S3Config, key: &str) -> Self {
        let endpoint = s3.endpoint_host();
        if s3.endpoint.starts_with("http://") {
            let connect_addr = if endpoint.contains(':') {
                endpoint.to_string()
            } else {
                format!("{endpoint}:80")
            };
            Self {
                tls: false,
                host: endpoint.to_string(),
                server_name: endpoint.to_string(),
                connect_addr,
                path: format!("/{}/{}", s3.bucket, key),
            }
        } else {
            let host = format!("{}.{}", s3.bucket, endpoint);
            Self {
                tls: true,
                server_name: host.clone(),
                connect_addr: format!("{host}:443"),
                host,
                path: format!("/{key}"),
            }
        }
    }

    fn url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}{}", self.host, self.path)
    }
}

// ── Signature V4 ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SignedHeaders {
    amz_date: String,
    payload_hash: String,
    authorization: String,
}

fn sign(
    s3: &S3Config,
    target: &Target,
    method: &str,
    body: &[u8],
    now: chrono::DateTime<chrono::Utc>,
) -> AutoscaleResult<SignedHeaders> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let region = s3.signing_region();
    let payload_hash = hex::encode(Sha256::digest(body));

    let canonical_request = format!(
        "{method}\n{path}\n\nhost:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n\
         host;x-amz-content-sha256;x-amz-date\n{payload_hash}",
        path = target.path,
        host = target.host,
    );
    let scope = format!("{date}/{region}/s3/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(&s3.secret_key, &date, &region, "s3")?;
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

    Ok(SignedHeaders {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={signature}",
            s3.access_key
        ),
        amz_date,
        payload_hash,
    })
}

fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> AutoscaleResult<[u8; 32]> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> AutoscaleResult<[u8; 32]> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|e| AutoscaleError::Storage(format!("signing key: {e}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}
