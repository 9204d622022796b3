//! HTTP and TLS probe client used by the synthetic/SSL prober (component
//! F). Kept as its own infra crate so the domain crate holds policy
//! (classification, cadence) while this one holds the actual I/O.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

/// Outcome of one HTTP leg of a probe.
#[derive(Debug, Clone)]
pub struct HttpProbeResult {
    pub status: Option<u16>,
    pub response_time_ms: u64,
    pub body: Option<String>,
    pub error: Option<String>,
}

/// Outcome of one TLS leg of a probe: either the peer certificate's
/// `not_after` or a connectivity failure.
#[derive(Debug, Clone)]
pub struct TlsProbeResult {
    pub not_after: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

pub struct HttpProbeRequest<'a> {
    pub url: &'a str,
    pub method: &'a str,
    pub headers: &'a std::collections::BTreeMap<String, String>,
    pub body: Option<&'a str>,
    pub timeout: Duration,
}

/// Performs one HTTP request, measuring wall time from request-start to
/// response-end. Never raises: any transport failure becomes an `error`
/// field on the result.
pub async fn run_http_probe(client: &reqwest::Client, req: HttpProbeRequest<'_>) -> HttpProbeResult {
    let method = reqwest::Method::from_bytes(req.method.as_bytes()).unwrap_or(reqwest::Method::GET);
    let mut builder = client.request(method, req.url).timeout(req.timeout);
    for (k, v) in req.headers {
        builder = builder.header(k, v);
    }
    if let Some(body) = req.body {
        builder = builder.body(body.to_string());
    }

    let start = Instant::now();
    match builder.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let body = response.text().await.ok();
            HttpProbeResult {
                status: Some(status),
                response_time_ms: start.elapsed().as_millis() as u64,
                body,
                error: None,
            }
        }
        Err(e) => HttpProbeResult {
            status: None,
            response_time_ms: start.elapsed().as_millis() as u64,
            body: None,
            error: Some(e.to_string()),
        },
    }
}

fn roots() -> rustls::RootCertStore {
    let mut store = rustls::RootCertStore::empty();
    store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    store
}

static CRYPTO_PROVIDER: OnceLock<()> = OnceLock::new();

/// `rustls` 0.22 requires a process-wide default `CryptoProvider` before
/// any `ClientConfig::builder()` call; installed lazily on first probe.
fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Opens a TLS connection with SNI=`host` and returns the peer
/// certificate's `not_after`, bounded by `timeout` for both TCP connect
/// and the TLS handshake.
pub async fn probe_ssl_expiry(host: &str, port: u16, timeout: Duration) -> TlsProbeResult {
    match tokio::time::timeout(timeout, probe_ssl_expiry_inner(host, port)).await {
        Ok(Ok(not_after)) => TlsProbeResult { not_after: Some(not_after), error: None },
        Ok(Err(e)) => TlsProbeResult { not_after: None, error: Some(e) },
        Err(_) => TlsProbeResult { not_after: None, error: Some("timed out".to_string()) },
    }
}

async fn probe_ssl_expiry_inner(host: &str, port: u16) -> Result<DateTime<Utc>, String> {
    ensure_crypto_provider();
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots())
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from(host.to_string()).map_err(|e| format!("invalid SNI host: {e}"))?;

    let tcp = TcpStream::connect((host, port)).await.map_err(|e| format!("tcp connect failed: {e}"))?;
    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| format!("tls handshake failed: {e}"))?;

    let (_, session) = tls.get_ref();
    let certs = session.peer_certificates().ok_or_else(|| "no peer certificate presented".to_string())?;
    let leaf = certs.first().ok_or_else(|| "empty certificate chain".to_string())?;

    parse_not_after(leaf.as_ref())
}

/// Extracts `notAfter` from a DER-encoded X.509 certificate.
fn parse_not_after(der: &[u8]) -> Result<DateTime<Utc>, String> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).map_err(|e| format!("certificate parse failed: {e}"))?;
    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0).ok_or_else(|| "certificate notAfter out of range".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn http_probe_reports_transport_error_without_panicking() {
        let client = reqwest::Client::new();
        let result = run_http_probe(
            &client,
            HttpProbeRequest {
                url: "http://127.0.0.1:1",
                method: "GET",
                headers: &Default::default(),
                body: None,
                timeout: Duration::from_millis(200),
            },
        )
        .await;
        assert!(result.status.is_none());
        assert!(result.error.is_some());
    }
}
