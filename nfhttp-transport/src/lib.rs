#![forbid(unsafe_code)]
//! The transport layer: the innermost `Client` implementation. Owns TCP/TLS
//! connections, the connection pool, proxy CONNECT tunneling, chunked
//! transfer framing, compression, per-request timeouts and single-resend
//! authentication.

mod auth;
mod compression;
mod connection;
mod pool;
mod proxy;
mod tls;
mod wire;

pub use auth::Credentials;
pub use connection::{Connection, PooledConnection};
pub use pool::{ConnectionPool, PoolKey, REAPER_PERIOD};
pub use proxy::ProxyConfig;
pub use tls::TlsVerify;

use std::sync::Arc;
use std::time::Duration;

use nfhttp_types::{Callback, Client, LabelsCallback, NfError, RequestToken, Response, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use crate::compression::ContentEncoding;
use crate::wire::BodyLength;

/// Tunables for a [`Transport`]; cloned cheaply since every field is either
/// `Copy` or already behind an `Arc`/`Option`.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub proxy: Option<ProxyConfig>,
    pub tls_verify: TlsVerify,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: Option<String>,
    /// When set, request bodies are sent with `Transfer-Encoding: chunked`
    /// instead of `Content-Length`.
    pub force_chunked_upload: bool,
    pub credentials: Option<Credentials>,
    /// Advertises `Accept-Encoding: deflate, gzip` on every request, matching
    /// what `compression::decode` is able to handle on the way back.
    pub enable_compression: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            tls_verify: TlsVerify::default(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            user_agent: None,
            force_chunked_upload: false,
            credentials: None,
            enable_compression: true,
        }
    }
}

/// The innermost layer of the client pipeline: performs real network I/O
/// and nothing else (no caching, no coalescing, no request rewriting).
#[derive(Clone)]
pub struct Transport {
    pool: Arc<ConnectionPool>,
    config: Arc<TransportConfig>,
    tls: tokio_rustls::TlsConnector,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        // rustls 0.23 requires a process-wide default crypto provider; this
        // is idempotent and safe to call from multiple Transport instances.
        let _ = rustls::crypto::ring::default_provider().install_default();
        let tls = tls::connector_for(config.tls_verify);
        Self { pool: Arc::new(ConnectionPool::new()), config: Arc::new(config), tls }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Client for Transport {
    fn perform(&self, request: nfhttp_types::Request, callback: Callback) -> RequestToken {
        let token = RequestToken::new();
        let transport = self.clone();
        let inner_token = token.clone();
        tokio::spawn(async move {
            let response = run_request(transport, request, inner_token).await;
            callback(response);
        });
        token
    }

    fn pin_labels(&self, callback: LabelsCallback) {
        callback(Vec::new());
    }
}

async fn run_request(
    transport: Transport,
    request: nfhttp_types::Request,
    token: RequestToken,
) -> Response {
    if token.cancelled() {
        return Response::cancelled(request);
    }
    let timeout = transport.config.request_timeout;

    // Gives an external `token.cancel()` somewhere to land while I/O is in
    // flight. Dropping the `work` future on the cancel branch drops every
    // connection it owns, which closes the socket immediately.
    let cancel_notify = Arc::new(tokio::sync::Notify::new());
    let notify_on_cancel = cancel_notify.clone();
    token.set_on_cancel(move || notify_on_cancel.notify_one());

    let work = tokio::time::timeout(timeout, attempt_with_resend(&transport, &request, &token));
    tokio::select! {
        result = work => match result {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => Response::error(request, &err),
            Err(_) => Response::error(request, &NfError::TimedOut),
        },
        _ = cancel_notify.notified() => Response::cancelled(request),
    }
}

/// Performs the request, and if it is challenged with `401`/`407` and we
/// hold credentials for a scheme we can satisfy, resends exactly once with
/// the credential header attached (WinHTTP's single-resend convention).
///
/// Credentials configured up front are attached preemptively on the first
/// attempt rather than waiting for a challenge, per the transport's
/// preemptive-auth contract; the resend path still exists for the case
/// where no credentials were configured ahead of time. Each attempt runs
/// under a dependent token so a cancel landing between the first attempt
/// and a resend is never silently swallowed.
async fn attempt_with_resend(
    transport: &Transport,
    request: &nfhttp_types::Request,
    token: &RequestToken,
) -> Result<Response> {
    let preemptive_auth = transport.config.credentials.as_ref().map(Credentials::basic_header_value);

    let dependent = token.create_dependent();
    let first = attempt(transport, request, preemptive_auth.clone(), &dependent).await;
    drop(dependent);
    let first = first?;

    if !matches!(first.status(), 401 | 407) {
        return Ok(first);
    }
    let Some(creds) = &transport.config.credentials else {
        return Ok(first);
    };
    if preemptive_auth.is_some() {
        // Already attached the only credential we have; a second attempt
        // would just repeat the same challenge.
        return Ok(first);
    }
    if token.cancelled() {
        return Err(NfError::Canceled);
    }
    let header_name = if first.status() == 407 { "Proxy-Authenticate" } else { "WWW-Authenticate" };
    let challenges: Vec<String> = first
        .headers()
        .get(header_name)
        .map(|v| vec![v.to_string()])
        .unwrap_or_default();
    if challenges.is_empty() {
        return Ok(first);
    }
    match auth::select_scheme(&challenges) {
        Ok("basic") => {
            let dependent = token.create_dependent();
            let result = attempt(transport, request, Some(creds.basic_header_value()), &dependent).await;
            drop(dependent);
            result
        }
        _ => Ok(first),
    }
}

async fn attempt(
    transport: &Transport,
    request: &nfhttp_types::Request,
    auth_header: Option<String>,
    token: &RequestToken,
) -> Result<Response> {
    let url = request.url();
    let host = url.host_str().ok_or_else(|| NfError::InvalidRequest("missing host".into()))?.to_string();
    let tls_on = url.scheme() == "https";
    let port = url.port_or_known_default().unwrap_or(if tls_on { 443 } else { 80 });

    let key = pool_key(transport, &host, port, tls_on);
    let pooled = transport.pool.acquire(&key);
    let (mut conn, is_reused) = match pooled {
        Some(p) => (p.connection, true),
        None => (connect(transport, &host, port, tls_on).await?, false),
    };

    let mut extra_headers = Vec::new();
    if !request.headers().contains("Host") {
        extra_headers.push(("Host".to_string(), host_header_value(&host, port, tls_on)));
    }
    extra_headers.push(("Connection".to_string(), "Keep-Alive".to_string()));
    if transport.config.enable_compression {
        extra_headers.push(("Accept-Encoding".to_string(), "deflate, gzip".to_string()));
    }
    if let Some(ua) = &transport.config.user_agent {
        extra_headers.push(("User-Agent".to_string(), ua.clone()));
    }
    if transport.config.proxy.is_some() && !tls_on {
        extra_headers.push(("Cache-Control".to_string(), "no-store, no-cache".to_string()));
        extra_headers.push(("Pragma".to_string(), "no-cache".to_string()));
    }
    if let Some(auth) = auth_header {
        extra_headers.push(("Authorization".to_string(), auth));
    }

    let request_target = request_target(transport, url);
    let write_result = write_and_read(&mut conn, request, &request_target, &extra_headers, transport).await;

    match write_result {
        Ok((status, headers, body, keep_alive)) => {
            transport.pool.release(
                key,
                PooledConnection { connection: conn, is_reused, keep_alive, is_closed: false, epoch: 0 },
            );
            let mut response = Response::new(request.clone(), status, headers, body);
            if is_reused {
                response.set_metadata("reused_connection", "1");
            }
            Ok(response)
        }
        Err(err) if is_reused => {
            // A pooled connection may have gone stale between release and
            // reuse; give it exactly one fresh attempt before surfacing the
            // error, since the peer's half-close races the pool reaper.
            pool::discard(conn).await;
            if token.cancelled() {
                return Err(NfError::Canceled);
            }
            let mut fresh = connect(transport, &host, port, tls_on).await?;
            let (status, headers, body, keep_alive) =
                write_and_read(&mut fresh, request, &request_target, &extra_headers, transport).await?;
            transport.pool.release(
                key,
                PooledConnection { connection: fresh, is_reused: false, keep_alive, is_closed: false, epoch: 0 },
            );
            Ok(Response::new(request.clone(), status, headers, body))
        }
        Err(err) => {
            pool::discard(conn).await;
            Err(err)
        }
    }
}

/// The `Host` header value for `host`/`port`, omitting the port when it
/// matches the scheme's default (RFC 7230 §5.4).
fn host_header_value(host: &str, port: u16, tls_on: bool) -> String {
    let default_port = if tls_on { 443 } else { 80 };
    if port == default_port {
        host.to_string()
    } else {
        format!("{host}:{port}")
    }
}

fn pool_key(transport: &Transport, host: &str, port: u16, tls_on: bool) -> PoolKey {
    match &transport.config.proxy {
        Some(proxy) if !tls_on => PoolKey { host: proxy.host.clone(), port: proxy.port, tls: false },
        _ => PoolKey { host: host.to_string(), port, tls: tls_on },
    }
}

fn request_target(transport: &Transport, url: &Url) -> String {
    match &transport.config.proxy {
        Some(_) if url.scheme() == "http" => url.as_str().to_string(),
        _ => {
            let mut target = url.path().to_string();
            if let Some(query) = url.query() {
                target.push('?');
                target.push_str(query);
            }
            if target.is_empty() {
                target.push('/');
            }
            target
        }
    }
}

async fn connect(transport: &Transport, host: &str, port: u16, tls_on: bool) -> Result<Connection> {
    let raw = match &transport.config.proxy {
        Some(proxy) if tls_on => {
            tokio::time::timeout(transport.config.connect_timeout, proxy::tunnel(proxy, host, port))
                .await
                .map_err(|_| NfError::TimedOut)??
        }
        Some(proxy) => {
            tokio::time::timeout(
                transport.config.connect_timeout,
                TcpStream::connect((proxy.host.as_str(), proxy.port)),
            )
            .await
            .map_err(|_| NfError::TimedOut)?
            .map_err(|e| NfError::ConnectFailure(e.to_string()))?
        }
        None => tokio::time::timeout(transport.config.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| NfError::TimedOut)?
            .map_err(|e| NfError::ConnectFailure(e.to_string()))?,
    };

    if !tls_on {
        return Ok(Connection::Plain(raw));
    }
    let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
        .map_err(|e| NfError::TlsFailure(e.to_string()))?;
    let tls_stream = transport
        .tls
        .connect(server_name, raw)
        .await
        .map_err(|e| NfError::TlsFailure(e.to_string()))?;
    Ok(Connection::Tls(Box::new(tls_stream)))
}

async fn write_and_read(
    conn: &mut Connection,
    request: &nfhttp_types::Request,
    request_target: &str,
    extra_headers: &[(String, String)],
    transport: &Transport,
) -> Result<(u16, nfhttp_types::HeaderMap, Vec<u8>, bool)> {
    let mut extra = extra_headers.to_vec();
    let body = request.body().map(<[u8]>::to_vec).unwrap_or_default();

    let header_requests_chunked = request
        .headers()
        .get("Transfer-Encoding")
        .map(|v| v.to_ascii_lowercase().contains("chunked"))
        .unwrap_or(false);
    let body_has_no_content_length = !body.is_empty() && !request.headers().contains("Content-Length");
    let use_chunked = !body.is_empty()
        && (transport.config.force_chunked_upload || header_requests_chunked || body_has_no_content_length);

    if use_chunked && !header_requests_chunked {
        extra.push(("Transfer-Encoding".to_string(), "chunked".to_string()));
    }
    if body.is_empty()
        && matches!(request.method(), nfhttp_types::Method::Post | nfhttp_types::Method::Put)
        && !request.headers().contains("Content-Length")
    {
        extra.push(("Content-Length".to_string(), "0".to_string()));
    }

    wire::write_request_head(conn, request, request_target, &extra).await?;
    if !body.is_empty() {
        if use_chunked {
            conn.write_all(&wire::encode_chunked(&body)).await.map_err(|e| NfError::Io(e.to_string()))?;
        } else {
            conn.write_all(&body).await.map_err(|e| NfError::Io(e.to_string()))?;
        }
    }
    conn.flush().await.map_err(|e| NfError::Io(e.to_string()))?;

    let mut reader = wire::buffered(&mut *conn);
    let status = wire::read_status_line(&mut reader).await?;
    let mut headers = wire::read_headers(&mut reader).await?;

    let is_head = wire::method_is_head(request.method());
    let framing = wire::response_body_length(status.status, is_head, &headers);
    let raw_body = match framing {
        BodyLength::Empty => Vec::new(),
        BodyLength::Fixed(len) => wire::read_fixed_body(&mut reader, len).await?,
        BodyLength::Chunked => wire::read_chunked_body(&mut reader, &mut headers).await?,
        BodyLength::UntilClose => wire::read_until_close(&mut reader).await?,
    };

    let encoding = ContentEncoding::from_header(headers.get("Content-Encoding"))?;
    let decoded_body = compression::decode(encoding, &raw_body)?;

    let keep_alive = match headers.get("Connection") {
        Some(v) if v.eq_ignore_ascii_case("close") => false,
        _ => true,
    };

    Ok((status.status, headers, decoded_body, keep_alive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nfhttp_types::{ClientExt, Method, Request};
    use tokio::net::TcpListener;

    async fn spawn_echo_server() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { return };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 8192];
                    let _ = sock.read(&mut buf).await.unwrap();
                    let body = b"hi";
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    sock.write_all(resp.as_bytes()).await.unwrap();
                    sock.write_all(body).await.unwrap();
                });
            }
        });
        addr
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn performs_a_plain_get_and_decodes_fixed_body() {
        let addr = spawn_echo_server().await;
        let transport = Transport::new(TransportConfig::default());
        let url = format!("http://{}/", addr);
        let request = Request::new(&url, Method::Get).unwrap();
        let response = transport.perform_sync(request);
        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), b"hi");
    }

    #[test]
    fn request_target_defaults_to_root_path() {
        use tokio::runtime::Builder;
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let transport = Transport::new(TransportConfig::default());
            let url = Url::parse("http://example.invalid").unwrap();
            assert_eq!(request_target(&transport, &url), "/");
        });
    }

    #[test]
    fn pool_key_routes_plain_http_through_proxy() {
        use tokio::runtime::Builder;
        let rt = Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let mut config = TransportConfig::default();
            config.proxy = Some(ProxyConfig { host: "proxy.invalid".into(), port: 3128, credentials: None });
            let transport = Transport::new(config);
            let key = pool_key(&transport, "origin.invalid", 80, false);
            assert_eq!(key.host, "proxy.invalid");
            assert_eq!(key.port, 3128);
        });
    }

    #[test]
    fn host_header_omits_default_port() {
        assert_eq!(host_header_value("example.invalid", 80, false), "example.invalid");
        assert_eq!(host_header_value("example.invalid", 443, true), "example.invalid");
        assert_eq!(host_header_value("example.invalid", 8080, false), "example.invalid:8080");
    }

    /// Spawns a server that captures the raw request head it receives and
    /// replies with a minimal fixed-length 200.
    async fn spawn_capturing_server() -> (std::net::SocketAddr, tokio::sync::oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = sock.read(&mut buf).await.unwrap();
            let _ = tx.send(String::from_utf8_lossy(&buf[..n]).to_string());
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await.unwrap();
        });
        (addr, rx)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sends_host_connection_and_accept_encoding_by_default() {
        let (addr, rx) = spawn_capturing_server().await;
        let transport = Transport::new(TransportConfig::default());
        let url = format!("http://{}/", addr);
        let request = Request::new(&url, Method::Get).unwrap();
        let _ = transport.perform_sync(request);
        let head = rx.await.unwrap();
        assert!(head.contains(&format!("Host: {addr}")));
        assert!(head.contains("Connection: Keep-Alive"));
        assert!(head.contains("Accept-Encoding: deflate, gzip"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn zero_length_post_gets_explicit_content_length() {
        let (addr, rx) = spawn_capturing_server().await;
        let transport = Transport::new(TransportConfig::default());
        let url = format!("http://{}/", addr);
        let request = Request::new(&url, Method::Post).unwrap();
        let _ = transport.perform_sync(request);
        let head = rx.await.unwrap();
        assert!(head.contains("Content-Length: 0"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn body_without_content_length_header_is_sent_chunked() {
        let (addr, rx) = spawn_capturing_server().await;
        let transport = Transport::new(TransportConfig::default());
        let url = format!("http://{}/", addr);
        let mut request = Request::new(&url, Method::Post).unwrap().with_body(b"payload".to_vec());
        request.headers_mut().remove("Content-Length");
        let _ = transport.perform_sync(request);
        let head = rx.await.unwrap();
        assert!(head.contains("Transfer-Encoding: chunked"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn credentials_are_attached_preemptively() {
        let (addr, rx) = spawn_capturing_server().await;
        let mut config = TransportConfig::default();
        config.credentials = Some(Credentials { username: "alice".into(), password: "wonderland".into() });
        let transport = Transport::new(config);
        let url = format!("http://{}/", addr);
        let request = Request::new(&url, Method::Get).unwrap();
        let _ = transport.perform_sync(request);
        let head = rx.await.unwrap();
        assert!(head.contains("Authorization: Basic"));
    }
}
